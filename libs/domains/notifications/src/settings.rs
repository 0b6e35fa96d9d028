//! Per-user notification preferences.
//!
//! [`PreferenceResolver`] answers "should this user get mail for this event"
//! and "at which cadence" on top of a [`SettingsClient`]. Every lookup fails
//! open: a broken settings service must never swallow notifications.

use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Global opt-out flag.
pub const SETTING_DISABLE_EMAIL: &str = "disable-email-notifications";
/// Delivery cadence (`instant`, `daily`, `weekly`).
pub const SETTING_EMAIL_INTERVAL: &str = "email-sending-interval-options";
/// Preferred language.
pub const SETTING_LANGUAGE: &str = "language";

pub const SETTING_SHARE_CREATED: &str = "event-share-created-options";
pub const SETTING_SHARE_EXPIRED: &str = "event-share-expired-options";
pub const SETTING_SHARE_REMOVED: &str = "event-share-removed-options";
pub const SETTING_SPACE_SHARED: &str = "event-space-shared-options";
pub const SETTING_SPACE_UNSHARED: &str = "event-space-unshared-options";
pub const SETTING_SPACE_MEMBERSHIP_EXPIRED: &str = "event-space-membership-expired-options";

/// Option inside a collection value that controls mail delivery.
const MAIL_OPTION: &str = "mail";

/// Leaf value of a collection option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOption {
    pub key: String,
    pub value: OptionValue,
}

/// A setting value as returned by the settings service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum SettingValue {
    Bool(bool),
    String(String),
    Collection(Vec<CollectionOption>),
    List(Vec<String>),
}

/// Settings service collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsClient: Send + Sync {
    /// Point lookup of one setting for one account; `None` when unset.
    async fn get_value(
        &self,
        user_id: &str,
        setting_id: &str,
    ) -> NotificationResult<Option<SettingValue>>;
}

/// In-memory settings store, used in tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySettings {
    values: Arc<RwLock<HashMap<(String, String), SettingValue>>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &str, setting_id: &str, value: SettingValue) {
        self.values
            .write()
            .await
            .insert((user_id.to_string(), setting_id.to_string()), value);
    }
}

#[async_trait]
impl SettingsClient for InMemorySettings {
    async fn get_value(
        &self,
        user_id: &str,
        setting_id: &str,
    ) -> NotificationResult<Option<SettingValue>> {
        let values = self.values.read().await;
        Ok(values
            .get(&(user_id.to_string(), setting_id.to_string()))
            .cloned())
    }
}

/// Resolves notification preferences, failing open on every error.
#[derive(Clone)]
pub struct PreferenceResolver {
    settings: Arc<dyn SettingsClient>,
}

impl PreferenceResolver {
    pub fn new(settings: Arc<dyn SettingsClient>) -> Self {
        Self { settings }
    }

    async fn lookup(&self, user_id: &str, setting_id: &str) -> Option<SettingValue> {
        match self.settings.get_value(user_id, setting_id).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!(user_id = %user_id, setting_id = %setting_id, "Setting not found");
                None
            }
            Err(e) => {
                error!(
                    user_id = %user_id,
                    setting_id = %setting_id,
                    error = %e,
                    "Failed to query setting"
                );
                None
            }
        }
    }

    /// Whether the user wants mail for the event behind `setting_id`.
    ///
    /// Accepts a plain boolean or a collection carrying a `mail` option.
    /// Anything else counts as opted in.
    pub async fn resolve_mail_enabled(&self, user_id: &str, setting_id: &str) -> bool {
        let Some(value) = self.lookup(user_id, setting_id).await else {
            return true;
        };

        let enabled = match &value {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Collection(options) => options
                .iter()
                .find(|o| o.key == MAIL_OPTION)
                .and_then(|o| match o.value {
                    OptionValue::Bool(b) => Some(b),
                    OptionValue::String(_) => None,
                }),
            _ => None,
        };

        enabled.unwrap_or_else(|| {
            error!(
                user_id = %user_id,
                setting_id = %setting_id,
                value = ?value,
                "Malformed mail setting, assuming enabled"
            );
            true
        })
    }

    /// Whether the user switched off all mail notifications. Fails open to `false`.
    pub async fn resolve_emails_disabled(&self, user_id: &str) -> bool {
        match self.lookup(user_id, SETTING_DISABLE_EMAIL).await {
            None => false,
            Some(SettingValue::Bool(b)) => b,
            Some(other) => {
                error!(
                    user_id = %user_id,
                    setting_id = %SETTING_DISABLE_EMAIL,
                    value = ?other,
                    "Malformed opt-out setting, assuming mail allowed"
                );
                false
            }
        }
    }

    /// Raw cadence string of the user; `"instant"` whenever resolution fails.
    ///
    /// The value is returned verbatim; callers map unknown strings to instant.
    pub async fn resolve_interval(&self, user_id: &str) -> String {
        match self.lookup(user_id, SETTING_EMAIL_INTERVAL).await {
            Some(SettingValue::String(s)) => s,
            None => "instant".to_string(),
            Some(other) => {
                error!(
                    user_id = %user_id,
                    setting_id = %SETTING_EMAIL_INTERVAL,
                    value = ?other,
                    "Malformed interval setting, assuming instant"
                );
                "instant".to_string()
            }
        }
    }

    /// Preferred locale of the user, or `default` when unset.
    pub async fn resolve_locale(&self, user_id: &str, default: &str) -> String {
        let locale = match self.lookup(user_id, SETTING_LANGUAGE).await {
            Some(SettingValue::String(s)) => Some(s),
            Some(SettingValue::List(list)) => list.into_iter().next(),
            Some(other) => {
                warn!(user_id = %user_id, value = ?other, "Unexpected language setting");
                None
            }
            None => None,
        };
        locale
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

impl std::fmt::Debug for PreferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceResolver").finish_non_exhaustive()
    }
}

/// Settings client that always fails; handy for exercising fail-open paths.
#[derive(Debug, Clone, Default)]
pub struct UnavailableSettings;

#[async_trait]
impl SettingsClient for UnavailableSettings {
    async fn get_value(
        &self,
        _user_id: &str,
        _setting_id: &str,
    ) -> NotificationResult<Option<SettingValue>> {
        Err(NotificationError::Settings("settings service unavailable".into()))
    }
}
