//! Inbound event stream consumer.
//!
//! Reads entries from the event stream through a consumer group. Each entry
//! carries one JSON-encoded [`Event`] in its `event` field. Decoded events are
//! recorded in the event history, so digests can resolve them later, and then
//! forwarded to the notifier. Entries are acknowledged once forwarded;
//! undecodable entries are logged and acknowledged so they are not retried
//! forever. An entry that fails to forward or ACK is logged and left pending
//! while the rest of its batch carries on.

use crate::config::WorkerConfig;
use domain_notifications::Event;
use domain_notifications::redis::RedisEventHistory;
use eyre::{Result, WrapErr, eyre};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const EVENT_FIELD: &str = "event";
const MAX_BACKOFF_SECS: u64 = 30;

pub struct EventConsumer {
    redis: ConnectionManager,
    history: RedisEventHistory,
    events: mpsc::Sender<Event>,
    config: WorkerConfig,
}

impl EventConsumer {
    pub fn new(
        redis: ConnectionManager,
        history: RedisEventHistory,
        events: mpsc::Sender<Event>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            redis,
            history,
            events,
            config,
        }
    }

    /// Consume until shutdown is signalled or the notifier goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            "Starting event consumer"
        );

        self.ensure_consumer_group().await?;

        // Entries delivered to this consumer id but never acknowledged.
        if let Err(e) = self.read_batch("0").await {
            warn!(error = %e, "Failed to replay pending entries");
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping consumer");
                break;
            }
            if self.events.is_closed() {
                return Err(eyre!("Notifier channel closed"));
            }

            match self.read_batch(">").await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!(errors = consecutive_errors, "Stream reads recovered");
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let err_str = e.to_string();

                    if err_str.contains("NOGROUP") {
                        warn!("Consumer group missing, recreating...");
                        if let Err(create_err) = self.ensure_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if is_connection_error(&err_str) {
                        let backoff_secs =
                            std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                        warn!(
                            error = %e,
                            consecutive_errors = consecutive_errors,
                            backoff_secs = backoff_secs,
                            "Redis connection error, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    } else {
                        error!(error = %e, "Error reading event stream");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Received shutdown signal, stopping consumer");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Event consumer stopped");
        Ok(())
    }

    async fn ensure_consumer_group(&self) -> Result<()> {
        let mut conn = self.redis.clone();

        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(group = %self.config.consumer_group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e).wrap_err("Failed to create consumer group"),
        }
    }

    /// Read one batch starting at `start` (`">"` for new entries, `"0"` for
    /// this consumer's pending ones) and handle every entry.
    async fn read_batch(&self, start: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.stream_name], &[start], &opts)
            .await?;

        for stream_key in reply.keys {
            if !stream_key.ids.is_empty() {
                debug!(count = stream_key.ids.len(), start = start, "Received stream entries");
            }
            let failed = handle_batch(
                stream_key.ids,
                || self.events.is_closed(),
                move |entry| async move {
                    let id = entry.id.clone();
                    self.handle_entry(entry)
                        .await
                        .wrap_err_with(|| format!("Failed to handle entry {id}"))
                },
            )
            .await;
            if failed > 0 {
                warn!(failed = failed, start = start, "Some stream entries left pending");
            }
        }
        Ok(())
    }

    async fn handle_entry(&self, entry: StreamId) -> Result<()> {
        let event = match parse_event(&entry.map) {
            Ok(event) => event,
            Err(e) => {
                error!(entry_id = %entry.id, error = %e, "Dropping undecodable stream entry");
                return self.ack(&entry.id).await;
            }
        };

        // Only grouped delivery reads history; instant mail still goes out.
        if let Err(e) = self.history.record(&event).await {
            error!(event_id = %event.id, error = %e, "Failed to record event history");
        }

        debug!(entry_id = %entry.id, event_id = %event.id, event_type = %event.event_type, "Forwarding event");
        self.events
            .send(event)
            .await
            .map_err(|_| eyre!("Notifier channel closed"))?;

        self.ack(&entry.id).await
    }

    async fn ack(&self, entry_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.xack::<_, _, _, ()>(&self.config.stream_name, &self.config.consumer_group, &[entry_id])
            .await
            .wrap_err_with(|| format!("Failed to ACK entry {entry_id}"))
    }
}

/// Handle `entries` in order and return how many failed.
///
/// A failed entry stays unacknowledged and is replayed from the pending list
/// on restart. The batch stops early only once the notifier is gone.
async fn handle_batch<T, F, Fut>(
    entries: Vec<T>,
    notifier_closed: impl Fn() -> bool,
    mut handle: F,
) -> usize
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = 0;
    for entry in entries {
        if notifier_closed() {
            break;
        }
        if let Err(e) = handle(entry).await {
            failed += 1;
            error!(error = %e, "Stream entry not acknowledged");
        }
    }
    failed
}

/// Decode the [`Event`] carried in a stream entry.
pub fn parse_event(map: &HashMap<String, redis::Value>) -> Result<Event> {
    let value = map
        .get(EVENT_FIELD)
        .ok_or_else(|| eyre!("Missing '{EVENT_FIELD}' field in stream entry"))?;

    let raw = match value {
        redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
        redis::Value::SimpleString(s) => s.clone(),
        _ => return Err(eyre!("Invalid '{EVENT_FIELD}' field type")),
    };

    serde_json::from_str(&raw).wrap_err("Failed to decode event")
}

fn is_connection_error(err_str: &str) -> bool {
    let lower = err_str.to_lowercase();
    lower.contains("connection")
        || lower.contains("disconnected")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
        || lower.contains("refused")
        || lower.contains("timed out")
        || lower.contains("eof")
        || lower.contains("io error")
}
