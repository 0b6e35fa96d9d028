//! Maps typed domain events to a template and its variables.

use crate::composer::Notification;
use crate::error::NotificationResult;
use crate::events::{
    DomainEvent, ScienceMeshInviteTokenGenerated, ShareCreated, ShareExpired, ShareRemoved,
    SpaceMembershipExpired, SpaceShared, SpaceUnshared,
};
use crate::gateway::Gateway;
use crate::settings;
use crate::templates::TemplateVars;
use crate::templates::phrases::{
    SCIENCE_MESH_INVITE, SHARE_CREATED, SHARE_EXPIRED, SHARE_REMOVED, SPACE_MEMBERSHIP_EXPIRED,
    SPACE_SHARED, SPACE_UNSHARED,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Link target for share notifications, relative to the base URL.
const SHARED_WITH_ME_PATH: &str = "files/shares/with-me";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-event setting id controlling mail delivery, for events that have one.
pub fn setting_id(event: &DomainEvent) -> Option<&'static str> {
    match event {
        DomainEvent::ShareCreated(_) => Some(settings::SETTING_SHARE_CREATED),
        DomainEvent::ShareExpired(_) => Some(settings::SETTING_SHARE_EXPIRED),
        DomainEvent::ShareRemoved(_) => Some(settings::SETTING_SHARE_REMOVED),
        DomainEvent::SpaceShared(_) => Some(settings::SETTING_SPACE_SHARED),
        DomainEvent::SpaceUnshared(_) => Some(settings::SETTING_SPACE_UNSHARED),
        DomainEvent::SpaceMembershipExpired(_) => Some(settings::SETTING_SPACE_MEMBERSHIP_EXPIRED),
        _ => None,
    }
}

/// Join `path` onto `base`; an empty base leaves the path relative.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn vars<const N: usize>(pairs: [(&str, String); N]) -> TemplateVars {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Builds [`Notification`]s, looking up names through the gateway.
#[derive(Clone)]
pub struct EventMapper {
    gateway: Arc<dyn Gateway>,
    base_url: String,
}

impl EventMapper {
    pub fn new(gateway: Arc<dyn Gateway>, base_url: impl Into<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.into(),
        }
    }

    /// Map one event; `Ok(None)` for events that never produce mail.
    pub async fn map(&self, event: &DomainEvent) -> NotificationResult<Option<Notification>> {
        let notification = match event {
            DomainEvent::ShareCreated(e) => self.share_created(e).await?,
            DomainEvent::ShareExpired(e) => self.share_expired(e).await?,
            DomainEvent::ShareRemoved(e) => self.share_removed(e).await?,
            DomainEvent::SpaceShared(e) => self.space_shared(e).await?,
            DomainEvent::SpaceUnshared(e) => self.space_unshared(e).await?,
            DomainEvent::SpaceMembershipExpired(e) => self.space_membership_expired(e).await?,
            DomainEvent::ScienceMeshInviteTokenGenerated(e) => self.invite(e).await?,
            DomainEvent::SendEmails(_) | DomainEvent::Unregistered { .. } => return Ok(None),
        };
        Ok(Some(notification))
    }

    async fn display_name(&self, user_id: &str) -> NotificationResult<String> {
        Ok(self.gateway.get_user(user_id).await?.display_name)
    }

    async fn share_created(&self, e: &ShareCreated) -> NotificationResult<Notification> {
        let sharer = self.display_name(&e.sharer).await?;
        let resource = self.gateway.stat_resource(&e.item_id).await?;
        Ok(Notification::new(
            SHARE_CREATED,
            vars([
                ("ShareSharer", sharer.clone()),
                ("ShareFolder", resource.name),
                ("ShareLink", join_url(&self.base_url, SHARED_WITH_ME_PATH)),
            ]),
            sharer,
        ))
    }

    async fn share_expired(&self, e: &ShareExpired) -> NotificationResult<Notification> {
        let owner = self.display_name(&e.share_owner).await?;
        let resource = self.gateway.stat_resource(&e.item_id).await?;
        Ok(Notification::new(
            SHARE_EXPIRED,
            vars([
                ("ShareFolder", resource.name),
                ("ExpiredAt", timestamp(&e.expired_at)),
            ]),
            owner,
        ))
    }

    async fn share_removed(&self, e: &ShareRemoved) -> NotificationResult<Notification> {
        let sharer = self.display_name(&e.executant).await?;
        let resource = self.gateway.stat_resource(&e.item_id).await?;
        Ok(Notification::new(
            SHARE_REMOVED,
            vars([("ShareSharer", sharer.clone()), ("ShareFolder", resource.name)]),
            sharer,
        ))
    }

    async fn space_shared(&self, e: &SpaceShared) -> NotificationResult<Notification> {
        let sharer = self.display_name(&e.executant).await?;
        let space = self.gateway.get_space(&e.space_id).await?;
        Ok(Notification::new(
            SPACE_SHARED,
            vars([
                ("SpaceSharer", sharer.clone()),
                ("SpaceName", space.name),
                ("ShareLink", self.space_link(&e.space_id)),
            ]),
            sharer,
        ))
    }

    async fn space_unshared(&self, e: &SpaceUnshared) -> NotificationResult<Notification> {
        let sharer = self.display_name(&e.executant).await?;
        let space = self.gateway.get_space(&e.space_id).await?;
        Ok(Notification::new(
            SPACE_UNSHARED,
            vars([
                ("SpaceSharer", sharer.clone()),
                ("SpaceName", space.name),
                ("ShareLink", self.space_link(&e.space_id)),
            ]),
            sharer,
        ))
    }

    async fn space_membership_expired(
        &self,
        e: &SpaceMembershipExpired,
    ) -> NotificationResult<Notification> {
        let owner = self.display_name(&e.space_owner).await?;
        Ok(Notification::new(
            SPACE_MEMBERSHIP_EXPIRED,
            vars([
                ("SpaceName", e.space_name.clone()),
                ("ExpiredAt", timestamp(&e.expired_at)),
            ]),
            owner,
        ))
    }

    async fn invite(&self, e: &ScienceMeshInviteTokenGenerated) -> NotificationResult<Notification> {
        let sharer = self.gateway.get_user(&e.sharer).await?;
        Ok(Notification::new(
            SCIENCE_MESH_INVITE,
            vars([
                ("InviteSharer", sharer.display_name.clone()),
                ("InviteSharerMail", sharer.mail),
                ("Token", e.token.clone()),
                ("Description", e.description.clone()),
                ("InviteLink", e.invite_link.clone()),
            ]),
            sharer.display_name,
        ))
    }

    fn space_link(&self, space_id: &str) -> String {
        join_url(&self.base_url, &format!("f/{space_id}"))
    }
}

impl std::fmt::Debug for EventMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMapper")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
