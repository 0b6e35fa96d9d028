//! Notification service configuration.

use core_config::{ConfigError, FromEnv, env_or_default, env_parse};

#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    /// Public URL that link paths are joined onto; empty keeps links relative.
    pub base_url: String,
    /// Sender of grouped digests.
    pub sender: String,
    pub default_locale: String,
    /// Upper bound of digest tasks running at the same time.
    pub max_concurrent_digests: usize,
    /// Redis key namespace of accumulator records.
    pub store_namespace: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            sender: "noreply@localhost".to_string(),
            default_locale: "en".to_string(),
            max_concurrent_digests: 16,
            store_namespace: "notifications:".to_string(),
        }
    }
}

impl FromEnv for NotificationsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_concurrent_digests =
            env_parse("NOTIFICATIONS_MAX_CONCURRENT_DIGESTS", defaults.max_concurrent_digests)?;
        if max_concurrent_digests == 0 {
            return Err(ConfigError::ParseError {
                key: "NOTIFICATIONS_MAX_CONCURRENT_DIGESTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            base_url: env_or_default("NOTIFICATIONS_BASE_URL", &defaults.base_url),
            sender: env_or_default("NOTIFICATIONS_SENDER", &defaults.sender),
            default_locale: env_or_default("NOTIFICATIONS_DEFAULT_LOCALE", &defaults.default_locale),
            max_concurrent_digests,
            store_namespace: env_or_default("NOTIFICATIONS_STORE_NAMESPACE", &defaults.store_namespace),
        })
    }
}
