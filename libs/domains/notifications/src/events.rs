//! Typed domain events.
//!
//! Inbound [`Event`]s carry their payload in serialized form. [`DomainEvent`]
//! decodes them by type discriminator into one of the known variants; anything
//! else becomes [`DomainEvent::Unregistered`], which callers log and skip.

use crate::error::NotificationResult;
use crate::models::Event;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A payload that travels inside an [`Event`] under a fixed type name.
pub trait EventPayload: Serialize + DeserializeOwned {
    const TYPE: &'static str;

    /// Wrap the payload into an event with a fresh id.
    fn to_event(&self) -> NotificationResult<Event> {
        Event::new(Self::TYPE, self)
    }
}

/// Receiving side of a share or space membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum Grantee {
    User(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareCreated {
    pub share_id: String,
    pub sharer: String,
    pub grantee: Grantee,
    pub item_id: String,
    pub ctime: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareExpired {
    pub share_id: String,
    pub share_owner: String,
    pub grantee: Grantee,
    pub item_id: String,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRemoved {
    pub share_id: String,
    pub executant: String,
    pub grantee: Grantee,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceShared {
    pub executant: String,
    pub grantee: Grantee,
    pub space_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceUnshared {
    pub executant: String,
    pub grantee: Grantee,
    pub space_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceMembershipExpired {
    pub space_owner: String,
    pub grantee: Grantee,
    pub space_id: String,
    pub space_name: String,
    pub expired_at: DateTime<Utc>,
}

/// Federation invite; the recipient is a bare mail address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScienceMeshInviteTokenGenerated {
    pub sharer: String,
    pub recipient_mail: String,
    pub token: String,
    pub description: String,
    pub invite_link: String,
}

/// Scheduling signal that triggers a digest run for one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEmails {
    pub interval: String,
}

macro_rules! event_payload {
    ($($ty:ident),* $(,)?) => {
        $(impl EventPayload for $ty {
            const TYPE: &'static str = stringify!($ty);
        })*
    };
}

event_payload!(
    ShareCreated,
    ShareExpired,
    ShareRemoved,
    SpaceShared,
    SpaceUnshared,
    SpaceMembershipExpired,
    ScienceMeshInviteTokenGenerated,
    SendEmails,
);

/// Every event kind the notification service knows how to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    ShareCreated(ShareCreated),
    ShareExpired(ShareExpired),
    ShareRemoved(ShareRemoved),
    SpaceShared(SpaceShared),
    SpaceUnshared(SpaceUnshared),
    SpaceMembershipExpired(SpaceMembershipExpired),
    ScienceMeshInviteTokenGenerated(ScienceMeshInviteTokenGenerated),
    SendEmails(SendEmails),
    Unregistered { event_type: String },
}

fn payload<T: EventPayload>(event: &Event) -> NotificationResult<T> {
    Ok(serde_json::from_value(event.payload.clone())?)
}

impl DomainEvent {
    /// Decode an event by its type discriminator.
    ///
    /// Unknown types are not an error; a known type with a malformed payload is.
    pub fn decode(event: &Event) -> NotificationResult<Self> {
        let decoded = match event.event_type.as_str() {
            ShareCreated::TYPE => DomainEvent::ShareCreated(payload(event)?),
            ShareExpired::TYPE => DomainEvent::ShareExpired(payload(event)?),
            ShareRemoved::TYPE => DomainEvent::ShareRemoved(payload(event)?),
            SpaceShared::TYPE => DomainEvent::SpaceShared(payload(event)?),
            SpaceUnshared::TYPE => DomainEvent::SpaceUnshared(payload(event)?),
            SpaceMembershipExpired::TYPE => DomainEvent::SpaceMembershipExpired(payload(event)?),
            ScienceMeshInviteTokenGenerated::TYPE => {
                DomainEvent::ScienceMeshInviteTokenGenerated(payload(event)?)
            }
            SendEmails::TYPE => DomainEvent::SendEmails(payload(event)?),
            other => DomainEvent::Unregistered {
                event_type: other.to_string(),
            },
        };
        Ok(decoded)
    }

    pub fn type_name(&self) -> &str {
        match self {
            DomainEvent::ShareCreated(_) => ShareCreated::TYPE,
            DomainEvent::ShareExpired(_) => ShareExpired::TYPE,
            DomainEvent::ShareRemoved(_) => ShareRemoved::TYPE,
            DomainEvent::SpaceShared(_) => SpaceShared::TYPE,
            DomainEvent::SpaceUnshared(_) => SpaceUnshared::TYPE,
            DomainEvent::SpaceMembershipExpired(_) => SpaceMembershipExpired::TYPE,
            DomainEvent::ScienceMeshInviteTokenGenerated(_) => ScienceMeshInviteTokenGenerated::TYPE,
            DomainEvent::SendEmails(_) => SendEmails::TYPE,
            DomainEvent::Unregistered { event_type } => event_type,
        }
    }

    /// User who triggered the event, for share and space events.
    pub fn executant(&self) -> Option<&str> {
        match self {
            DomainEvent::ShareCreated(e) => Some(&e.sharer),
            DomainEvent::ShareExpired(e) => Some(&e.share_owner),
            DomainEvent::ShareRemoved(e) => Some(&e.executant),
            DomainEvent::SpaceShared(e) => Some(&e.executant),
            DomainEvent::SpaceUnshared(e) => Some(&e.executant),
            DomainEvent::SpaceMembershipExpired(e) => Some(&e.space_owner),
            _ => None,
        }
    }

    pub fn grantee(&self) -> Option<&Grantee> {
        match self {
            DomainEvent::ShareCreated(e) => Some(&e.grantee),
            DomainEvent::ShareExpired(e) => Some(&e.grantee),
            DomainEvent::ShareRemoved(e) => Some(&e.grantee),
            DomainEvent::SpaceShared(e) => Some(&e.grantee),
            DomainEvent::SpaceUnshared(e) => Some(&e.grantee),
            DomainEvent::SpaceMembershipExpired(e) => Some(&e.grantee),
            _ => None,
        }
    }
}
