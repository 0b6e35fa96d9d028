//! Worker configuration.

use core_config::redis::RedisConfig;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis: RedisConfig,
    /// Redis stream the platform publishes events to.
    pub stream_name: String,
    pub consumer_group: String,
    /// Unique per process so pending entries can be traced to a worker.
    pub consumer_id: String,
    /// Entries read per XREADGROUP call.
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// Six-field cron expressions (seconds first), evaluated in UTC.
    pub daily_cron: String,
    pub weekly_cron: String,
    /// Lifetime of event history records; must outlive the weekly interval.
    pub event_ttl_secs: u64,
    /// Capacity of the channel between the consumer and the notifier.
    pub channel_capacity: usize,
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let channel_capacity = env_parse("NOTIFICATIONS_CHANNEL_CAPACITY", 256)?;
        if channel_capacity == 0 {
            return Err(ConfigError::ParseError {
                key: "NOTIFICATIONS_CHANNEL_CAPACITY".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            redis: RedisConfig::from_env()?,
            stream_name: env_or_default("NOTIFICATIONS_EVENT_STREAM", "notifications:events"),
            consumer_group: env_or_default("NOTIFICATIONS_CONSUMER_GROUP", "notifications_workers"),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            batch_size: env_parse("NOTIFICATIONS_BATCH_SIZE", 10)?,
            poll_interval_ms: env_parse("NOTIFICATIONS_POLL_INTERVAL_MS", 500)?,
            daily_cron: env_or_default("NOTIFICATIONS_DAILY_CRON", "0 0 8 * * *"),
            weekly_cron: env_or_default("NOTIFICATIONS_WEEKLY_CRON", "0 0 8 * * Mon"),
            event_ttl_secs: env_parse("NOTIFICATIONS_EVENT_TTL_SECS", 30 * 24 * 60 * 60)?,
            channel_capacity,
        })
    }
}
