//! Digest job runner.
//!
//! A run is triggered for one grouped interval. It lists every pending
//! accumulator key of that interval and spawns one task per key; each task
//! pops the user's events, maps them to templates, composes one digest and
//! hands it to the channel. Tasks are independent of each other and of the
//! caller: [`DigestJobRunner::run`] returns as soon as they are spawned.
//!
//! Concurrency is bounded by a semaphore. Every task reports a
//! [`DigestOutcome`] on the returned [`DigestRun`], which callers may await
//! or simply drop.

use crate::accumulator::UserEventStore;
use crate::composer::{MessageComposer, Notification};
use crate::error::{NotificationError, NotificationResult};
use crate::events::DomainEvent;
use crate::mapping::EventMapper;
use crate::models::{Interval, UserEvents};
use crate::providers::Channel;
use crate::settings::PreferenceResolver;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Terminal state of one per-user digest task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    /// A digest with `events` fragments was handed to the channel.
    Sent { key: String, events: usize },
    /// Nothing renderable was pending; no message was sent.
    Empty { key: String },
    /// Popping, composing or sending failed.
    Failed { key: String, error: String },
}

impl DigestOutcome {
    pub fn key(&self) -> &str {
        match self {
            DigestOutcome::Sent { key, .. }
            | DigestOutcome::Empty { key }
            | DigestOutcome::Failed { key, .. } => key,
        }
    }
}

/// Handle on a dispatched run.
#[derive(Debug)]
pub struct DigestRun {
    pub interval: Interval,
    /// Number of per-user tasks spawned.
    pub dispatched: usize,
    outcomes: mpsc::UnboundedReceiver<DigestOutcome>,
}

impl DigestRun {
    /// Wait until every task of the run has finished.
    pub async fn wait(mut self) -> Vec<DigestOutcome> {
        let mut outcomes = Vec::with_capacity(self.dispatched);
        while let Some(outcome) = self.outcomes.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct DigestJobRunner {
    accumulator: UserEventStore,
    mapper: EventMapper,
    composer: MessageComposer,
    resolver: PreferenceResolver,
    channel: Arc<dyn Channel>,
    limiter: Arc<Semaphore>,
    default_locale: String,
}

impl DigestJobRunner {
    pub fn new(
        accumulator: UserEventStore,
        mapper: EventMapper,
        composer: MessageComposer,
        resolver: PreferenceResolver,
        channel: Arc<dyn Channel>,
        max_concurrent: usize,
        default_locale: impl Into<String>,
    ) -> Self {
        Self {
            accumulator,
            mapper,
            composer,
            resolver,
            channel,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            default_locale: default_locale.into(),
        }
    }

    /// Dispatch one digest task per pending user of `interval`.
    ///
    /// Only `daily` and `weekly` are accepted.
    pub async fn run(&self, interval: &str) -> NotificationResult<DigestRun> {
        let interval = match interval.parse::<Interval>() {
            Ok(i) if i.is_grouped() => i,
            _ => {
                error!(interval = %interval, "Digest run requested for unsupported interval");
                return Err(NotificationError::UnknownInterval(interval.to_string()));
            }
        };

        let keys = self
            .accumulator
            .list_pending_keys(&interval.key_prefix())
            .await
            .map_err(|e| {
                error!(interval = %interval, error = %e, "Failed to list pending digests");
                e
            })?;

        info!(interval = %interval, pending = keys.len(), "Dispatching digests");

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatched = keys.len();
        for key in keys {
            let runner = self.clone();
            let tx = tx.clone();
            let span = info_span!("digest", key = %key);
            tokio::spawn(
                async move {
                    let outcome = match runner.limiter.clone().acquire_owned().await {
                        Ok(_permit) => runner.deliver(&key).await,
                        Err(e) => DigestOutcome::Failed {
                            key,
                            error: e.to_string(),
                        },
                    };
                    // The run handle may already be gone.
                    let _ = tx.send(outcome);
                }
                .instrument(span),
            );
        }

        Ok(DigestRun {
            interval,
            dispatched,
            outcomes: rx,
        })
    }

    async fn deliver(&self, key: &str) -> DigestOutcome {
        let bundle = match self.accumulator.pop_and_resolve(key).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to pop pending events, keeping them for the next run");
                return DigestOutcome::Failed {
                    key: key.to_string(),
                    error: e.to_string(),
                };
            }
        };

        let user = bundle.user.clone();
        let notifications = self.map_events(key, bundle).await;
        if notifications.is_empty() {
            info!(key = %key, user_id = %user.opaque_id, "No mappable events, skipping digest");
            return DigestOutcome::Empty {
                key: key.to_string(),
            };
        }

        let locale = self
            .resolver
            .resolve_locale(&user.opaque_id, &self.default_locale)
            .await;
        let message = match self.composer.compose_grouped(&notifications, &locale, &user) {
            Ok(message) => message,
            Err(NotificationError::EmptyDigest(_)) => {
                info!(key = %key, user_id = %user.opaque_id, "Digest rendered empty, skipping");
                return DigestOutcome::Empty {
                    key: key.to_string(),
                };
            }
            Err(e) => {
                error!(key = %key, user_id = %user.opaque_id, error = %e, "Failed to compose digest");
                return DigestOutcome::Failed {
                    key: key.to_string(),
                    error: e.to_string(),
                };
            }
        };

        if let Err(e) = self.channel.send(&message).await {
            error!(
                key = %key,
                user_id = %user.opaque_id,
                channel = self.channel.name(),
                error = %e,
                "Failed to send digest"
            );
            return DigestOutcome::Failed {
                key: key.to_string(),
                error: e.to_string(),
            };
        }

        info!(key = %key, user_id = %user.opaque_id, events = notifications.len(), "Digest sent");
        DigestOutcome::Sent {
            key: key.to_string(),
            events: notifications.len(),
        }
    }

    /// Map each event; anything that cannot be mapped is logged and dropped.
    async fn map_events(&self, key: &str, bundle: UserEvents) -> Vec<Notification> {
        let mut notifications = Vec::with_capacity(bundle.events.len());
        for event in &bundle.events {
            let decoded = match DomainEvent::decode(event) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(key = %key, event_id = %event.id, error = %e, "Undecodable event in digest");
                    continue;
                }
            };
            match self.mapper.map(&decoded).await {
                Ok(Some(notification)) => notifications.push(notification),
                Ok(None) => {
                    warn!(
                        key = %key,
                        event_id = %event.id,
                        event_type = %decoded.type_name(),
                        "Unregistered event type in digest"
                    );
                }
                Err(e) => {
                    error!(key = %key, event_id = %event.id, error = %e, "Failed to map event");
                }
            }
        }
        debug!(key = %key, mapped = notifications.len(), total = bundle.events.len(), "Mapped digest events");
        notifications
    }
}

impl std::fmt::Debug for DigestJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestJobRunner")
            .field("default_locale", &self.default_locale)
            .finish_non_exhaustive()
    }
}
