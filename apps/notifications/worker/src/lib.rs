//! Notifications Worker Service
//!
//! Delivers notification emails for platform events.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (notifications:events)      Cron (daily / weekly)
//!   ↓ (Consumer Group)                       ↓ SendEmails{interval}
//! EventConsumer ── records history ──┐       │
//!   ↓                                ↓       ↓
//!   └──────────────► mpsc channel ◄──────────┘
//!                        ↓
//!                  EventsNotifier
//!                        ↓
//!          instant mail / accumulator / digest runs
//!                        ↓
//!                   SMTP channel
//! ```

pub mod config;
pub mod consumer;
pub mod scheduler;

use config::WorkerConfig;
use consumer::EventConsumer;
use core_config::{Environment, FromEnv};
use domain_notifications::redis::{
    RedisEventHistory, RedisGateway, RedisSettings, RedisStore, connect_with_retry,
};
use domain_notifications::{
    Channel, DigestJobRunner, EventMapper, EventsNotifier, Gateway, MessageComposer,
    NotificationsConfig, NotifierDeps, PreferenceResolver, SmtpChannel, SmtpConfig,
    TemplateEngine, UserEventStore,
};
use eyre::{Result, WrapErr};
use scheduler::DigestScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Run the notifications worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Loads configuration and connects to Redis with retry
/// 3. Wires the notifier over the Redis-backed collaborators and SMTP
/// 4. Runs the stream consumer and the digest scheduler until SIGINT/SIGTERM
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment, env!("CARGO_PKG_NAME"));

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting notifications worker"
    );

    let config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let notifications =
        NotificationsConfig::from_env().wrap_err("Failed to load notifications configuration")?;
    let smtp = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&config.redis)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let history = RedisEventHistory::new(redis.clone(), Duration::from_secs(config.event_ttl_secs));
    let gateway: Arc<dyn Gateway> = Arc::new(RedisGateway::new(redis.clone()));
    let resolver = PreferenceResolver::new(Arc::new(RedisSettings::new(redis.clone())));
    let accumulator = UserEventStore::new(
        Arc::new(RedisStore::new(redis.clone(), notifications.store_namespace.clone())),
        Arc::new(history.clone()),
    );
    let mapper = EventMapper::new(gateway.clone(), notifications.base_url.clone());
    let templates = TemplateEngine::new().wrap_err("Failed to initialize template engine")?;
    let composer = MessageComposer::new(templates, notifications.sender.clone());
    let channel: Arc<dyn Channel> =
        Arc::new(SmtpChannel::new(smtp).wrap_err("Failed to create SMTP channel")?);
    info!(channel = channel.name(), "Delivery channel ready");

    let runner = DigestJobRunner::new(
        accumulator.clone(),
        mapper.clone(),
        composer.clone(),
        resolver.clone(),
        channel.clone(),
        notifications.max_concurrent_digests,
        notifications.default_locale.clone(),
    );
    let notifier = EventsNotifier::new(
        NotifierDeps {
            gateway,
            resolver,
            mapper,
            composer,
            accumulator,
            runner,
            channel,
        },
        notifications.default_locale.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if let Err(e) = shutdown_signal().await {
                error!("Error waiting for shutdown signal: {}", e);
            }
            let _ = shutdown_tx.send(true);
        }
    });

    let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);

    let notifier_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { notifier.run(events_rx, shutdown).await }
    });

    let scheduler =
        DigestScheduler::start(&config.daily_cron, &config.weekly_cron, events_tx.clone()).await?;

    let consumer = EventConsumer::new(redis, history, events_tx, config);
    let result = wind_down(
        consumer.run(shutdown_rx),
        scheduler.shutdown(),
        &shutdown_tx,
        notifier_task,
    )
    .await;

    info!("Notifications worker stopped");
    result
}

/// Wait for the consumer to stop, then stop the scheduler and the notifier.
///
/// Shutdown is signalled whether the consumer ended on a signal or on an
/// error, so the notifier always drains and returns. The consumer's result
/// is returned.
async fn wind_down<C, S>(
    consumer: C,
    stop_scheduler: S,
    shutdown: &watch::Sender<bool>,
    notifier: JoinHandle<()>,
) -> Result<()>
where
    C: Future<Output = Result<()>>,
    S: Future<Output = Result<()>>,
{
    let consumed = consumer.await;
    if let Err(e) = &consumed {
        error!(error = %e, "Event consumer failed");
    }

    let _ = shutdown.send(true);
    if let Err(e) = stop_scheduler.await {
        error!(error = %e, "Failed to stop digest scheduler");
    }

    notifier
        .await
        .wrap_err("Events notifier task panicked")?;
    consumed
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
