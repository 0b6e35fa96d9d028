//! Cron triggers for digest runs.
//!
//! Each job publishes a `SendEmails` event for its interval into the same
//! channel the stream consumer feeds, so digest runs go through the notifier
//! like any other event.

use domain_notifications::events::{EventPayload, SendEmails};
use domain_notifications::{Event, Interval};
use eyre::{Result, WrapErr, eyre};
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub struct DigestScheduler {
    scheduler: JobScheduler,
}

impl DigestScheduler {
    /// Register the daily and weekly jobs and start ticking.
    pub async fn start(
        daily_cron: &str,
        weekly_cron: &str,
        events: mpsc::Sender<Event>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .wrap_err("Failed to create job scheduler")?;

        for (cron, interval) in [(daily_cron, Interval::Daily), (weekly_cron, Interval::Weekly)] {
            scheduler
                .add(digest_job(cron, interval, events.clone())?)
                .await
                .wrap_err_with(|| format!("Failed to schedule {interval} digests"))?;
            info!(cron = cron, interval = %interval, "Scheduled digest trigger");
        }

        scheduler
            .start()
            .await
            .wrap_err("Failed to start job scheduler")?;
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .wrap_err("Failed to stop job scheduler")
    }
}

fn digest_job(cron: &str, interval: Interval, events: mpsc::Sender<Event>) -> Result<Job> {
    Job::new_async(cron, move |_uuid, _l| {
        let events = events.clone();
        Box::pin(async move {
            if let Err(e) = trigger(interval, &events).await {
                error!(interval = %interval, error = %e, "Failed to trigger digest run");
            }
        })
    })
    .wrap_err_with(|| format!("Invalid cron expression '{cron}' for {interval} digests"))
}

/// Publish a `SendEmails` event for `interval`.
pub async fn trigger(interval: Interval, events: &mpsc::Sender<Event>) -> Result<()> {
    let event = SendEmails {
        interval: interval.as_str().to_string(),
    }
    .to_event()?;
    info!(interval = %interval, event_id = %event.id, "Triggering digest run");
    events
        .send(event)
        .await
        .map_err(|_| eyre!("Notifier channel closed"))
}
