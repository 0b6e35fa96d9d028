//! Redis-backed collaborators.
//!
//! | Adapter | Keys |
//! |---|---|
//! | [`RedisStore`] | `<namespace><interval>_<user>` (JSON accumulator records) |
//! | [`RedisEventHistory`] | `eventhistory:<event id>` (JSON events, with TTL) |
//! | [`RedisSettings`] | hash `settings:<user>`, field per setting id (JSON values) |
//! | [`RedisGateway`] | `users:<id>`, `groups:<id>`, `resources:<id>`, `spaces:<id>` |
//!
//! All adapters hold a cloneable [`ConnectionManager`], which reconnects on
//! its own.

use crate::error::{NotificationError, NotificationResult};
use crate::gateway::{Gateway, ResourceInfo, SpaceInfo};
use crate::history::EventHistory;
use crate::models::{Event, Recipient};
use crate::settings::{SettingValue, SettingsClient};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use core_config::redis::RedisConfig;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

const HISTORY_PREFIX: &str = "eventhistory:";
const SETTINGS_PREFIX: &str = "settings:";
const SCAN_BATCH: usize = 100;

/// Open a managed connection and verify it with PING.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    info!("Attempting to connect to Redis");

    let client = redis::Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// [`connect`] with exponential backoff, as configured in [`RedisConfig`].
pub async fn connect_with_retry(config: &RedisConfig) -> redis::RedisResult<ConnectionManager> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_retry_delay_ms;

    loop {
        match connect(&config.url).await {
            Ok(manager) => {
                if attempt > 0 {
                    debug!(retries = attempt, "Connected to Redis after retrying");
                }
                return Ok(manager);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    warn!(attempts = attempts, error = %e, "Giving up connecting to Redis");
                    return Err(e);
                }
                warn!(
                    attempt = attempt,
                    attempts = attempts,
                    delay_ms = delay,
                    error = %e,
                    "Redis connection failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY_MS);
            }
        }
    }
}

/// Escape glob metacharacters so `s` matches literally in `SCAN MATCH`.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Accumulator store
// ============================================================================

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            redis,
            namespace: namespace.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn read(&self, key: &str) -> NotificationResult<Option<Vec<u8>>> {
        let mut conn = self.redis.clone();
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(self.key(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> NotificationResult<Vec<String>> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.namespace).map(str::to_string)),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        debug!(prefix = %prefix, count = keys.len(), "Listed pending keys");
        Ok(keys)
    }
}

// ============================================================================
// Event history
// ============================================================================

#[derive(Clone)]
pub struct RedisEventHistory {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisEventHistory {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    /// Store an event so a later digest can resolve it by id.
    pub async fn record(&self, event: &Event) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_vec(event)?;
        conn.set_ex::<_, _, ()>(
            format!("{HISTORY_PREFIX}{}", event.id),
            value,
            self.ttl.as_secs().max(1),
        )
        .await
        .map_err(|e| NotificationError::History(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventHistory for RedisEventHistory {
    async fn get_events(&self, ids: &[String]) -> NotificationResult<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let keys: Vec<String> = ids.iter().map(|id| format!("{HISTORY_PREFIX}{id}")).collect();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| NotificationError::History(e.to_string()))?;

        values
            .into_iter()
            .flatten()
            .map(|raw| {
                serde_json::from_slice(&raw).map_err(|e| NotificationError::History(e.to_string()))
            })
            .collect()
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Clone)]
pub struct RedisSettings {
    redis: ConnectionManager,
}

impl RedisSettings {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SettingsClient for RedisSettings {
    async fn get_value(
        &self,
        user_id: &str,
        setting_id: &str,
    ) -> NotificationResult<Option<SettingValue>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .hget(format!("{SETTINGS_PREFIX}{user_id}"), setting_id)
            .await
            .map_err(|e| NotificationError::Settings(e.to_string()))?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| NotificationError::Settings(e.to_string()))
        })
        .transpose()
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Clone)]
pub struct RedisGateway {
    redis: ConnectionManager,
}

impl RedisGateway {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn fetch<T: DeserializeOwned>(&self, kind: &str, id: &str) -> NotificationResult<T> {
        let mut conn = self.redis.clone();
        let key = format!("{kind}s:{id}");
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| NotificationError::Gateway(e.to_string()))?;
        let raw = raw.ok_or_else(|| NotificationError::Gateway(format!("{kind} '{id}' not found")))?;
        serde_json::from_str(&raw)
            .map_err(|e| NotificationError::Gateway(format!("malformed {kind} '{id}': {e}")))
    }
}

#[async_trait]
impl Gateway for RedisGateway {
    async fn get_user(&self, user_id: &str) -> NotificationResult<Recipient> {
        self.fetch("user", user_id).await
    }

    async fn get_group_members(&self, group_id: &str) -> NotificationResult<Vec<String>> {
        self.fetch("group", group_id).await
    }

    async fn stat_resource(&self, resource_id: &str) -> NotificationResult<ResourceInfo> {
        self.fetch("resource", resource_id).await
    }

    async fn get_space(&self, space_id: &str) -> NotificationResult<SpaceInfo> {
        self.fetch("space", space_id).await
    }
}
