//! Inbound event handling.
//!
//! [`EventsNotifier`] pulls events off a channel and handles each one in its
//! own task: share and space events are addressed, filtered by preference and
//! either sent right away or accumulated for a digest; `SendEmails` signals
//! start a digest run.

use crate::accumulator::UserEventStore;
use crate::composer::{MessageComposer, Notification};
use crate::digest::{DigestJobRunner, DigestOutcome};
use crate::error::{NotificationError, NotificationResult};
use crate::events::{DomainEvent, Grantee, ScienceMeshInviteTokenGenerated};
use crate::gateway::Gateway;
use crate::mapping::{self, EventMapper};
use crate::models::{Event, Interval, Recipient};
use crate::providers::Channel;
use crate::settings::PreferenceResolver;
use crate::splitter;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Collaborators of the notifier.
#[derive(Clone)]
pub struct NotifierDeps {
    pub gateway: Arc<dyn Gateway>,
    pub resolver: PreferenceResolver,
    pub mapper: EventMapper,
    pub composer: MessageComposer,
    pub accumulator: UserEventStore,
    pub runner: DigestJobRunner,
    pub channel: Arc<dyn Channel>,
}

#[derive(Clone)]
pub struct EventsNotifier {
    deps: NotifierDeps,
    default_locale: String,
}

impl EventsNotifier {
    pub fn new(deps: NotifierDeps, default_locale: impl Into<String>) -> Self {
        Self {
            deps,
            default_locale: default_locale.into(),
        }
    }

    /// Pull events until the sender side closes or shutdown is signalled.
    ///
    /// Every event is handled in its own task. Once pulling stops, tasks
    /// already started are awaited rather than aborted.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
        info!("Starting events notifier");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Received shutdown signal, no longer pulling events");
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Event task panicked");
                    }
                }
                received = events.recv() => {
                    let Some(event) = received else {
                        info!("Event source closed");
                        break;
                    };
                    let notifier = self.clone();
                    let span = info_span!("event", event_id = %event.id, event_type = %event.event_type);
                    tasks.spawn(
                        async move {
                            if let Err(e) = notifier.handle(event).await {
                                error!(error = %e, "Failed to handle event");
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight = in_flight, "Waiting for in-flight events");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Event task panicked");
            }
        }
        info!("Events notifier stopped");
    }

    /// Handle a single inbound event.
    pub async fn handle(&self, event: Event) -> NotificationResult<()> {
        let decoded = DomainEvent::decode(&event)?;
        match &decoded {
            DomainEvent::SendEmails(signal) => {
                let run = self.deps.runner.run(&signal.interval).await?;
                let interval = run.interval;
                debug!(interval = %interval, dispatched = run.dispatched, "Digest run started");

                // Held by this event's task so the shutdown drain covers popped digests.
                let outcomes = run.wait().await;
                let failed = outcomes
                    .iter()
                    .filter(|o| matches!(o, DigestOutcome::Failed { .. }))
                    .count();
                info!(interval = %interval, finished = outcomes.len(), failed = failed, "Digest run finished");
                Ok(())
            }
            DomainEvent::Unregistered { event_type } => {
                debug!(event_type = %event_type, "Ignoring unregistered event type");
                Ok(())
            }
            DomainEvent::ScienceMeshInviteTokenGenerated(invite) => {
                self.send_invite(&decoded, invite).await
            }
            _ => self.notify(&event, &decoded).await,
        }
    }

    async fn send_invite(
        &self,
        decoded: &DomainEvent,
        invite: &ScienceMeshInviteTokenGenerated,
    ) -> NotificationResult<()> {
        let notification = self.mapped(decoded).await?;
        let recipient = Recipient::new("", "", invite.recipient_mail.clone());
        let message = self
            .deps
            .composer
            .compose(&notification, &self.default_locale, &recipient)?;
        self.deps.channel.send(&message).await?;
        info!(recipient = %invite.recipient_mail, "Sent federation invite");
        Ok(())
    }

    async fn notify(&self, event: &Event, decoded: &DomainEvent) -> NotificationResult<()> {
        let (Some(executant), Some(grantee), Some(setting_id)) = (
            decoded.executant(),
            decoded.grantee(),
            mapping::setting_id(decoded),
        ) else {
            return Err(NotificationError::Internal(format!(
                "{} is not a share or space event",
                decoded.type_name()
            )));
        };

        let recipients = self.recipients(grantee, executant).await?;
        let recipients = self.wanting_mail(recipients, setting_id).await;
        if recipients.is_empty() {
            debug!("No recipient wants mail for this event");
            return Ok(());
        }

        let notification = self.mapped(decoded).await?;
        let split = splitter::split(&self.deps.resolver, recipients).await;

        for recipient in &split.instant {
            self.send_instant(&notification, recipient).await;
        }
        for interval in [Interval::Daily, Interval::Weekly] {
            let bucket = split.bucket(interval);
            if bucket.is_empty() {
                continue;
            }
            let failed = self.deps.accumulator.append(interval, &event.id, bucket).await;
            if !failed.is_empty() {
                let users: Vec<&str> = failed.iter().map(|r| r.opaque_id.as_str()).collect();
                error!(
                    interval = %interval,
                    failed = ?users,
                    "Could not persist grouped notification for some users"
                );
            }
        }
        Ok(())
    }

    async fn mapped(&self, decoded: &DomainEvent) -> NotificationResult<Notification> {
        self.deps.mapper.map(decoded).await?.ok_or_else(|| {
            NotificationError::Internal(format!("no template for {}", decoded.type_name()))
        })
    }

    /// Users on the receiving end, executant excluded.
    async fn recipients(&self, grantee: &Grantee, executant: &str) -> NotificationResult<Vec<Recipient>> {
        let user_ids = match grantee {
            Grantee::User(id) => vec![id.clone()],
            Grantee::Group(id) => self.deps.gateway.get_group_members(id).await?,
        };

        let mut recipients = Vec::with_capacity(user_ids.len());
        for user_id in user_ids.iter().filter(|id| id.as_str() != executant) {
            match self.deps.gateway.get_user(user_id).await {
                Ok(user) => recipients.push(user),
                Err(e) => warn!(user_id = %user_id, error = %e, "Could not look up recipient"),
            }
        }
        Ok(recipients)
    }

    async fn wanting_mail(&self, recipients: Vec<Recipient>, setting_id: &str) -> Vec<Recipient> {
        let mut wanted = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let resolver = &self.deps.resolver;
            if resolver.resolve_emails_disabled(&recipient.opaque_id).await {
                debug!(user_id = %recipient.opaque_id, "Mail notifications disabled");
                continue;
            }
            if !resolver.resolve_mail_enabled(&recipient.opaque_id, setting_id).await {
                debug!(user_id = %recipient.opaque_id, setting_id = %setting_id, "Opted out of event");
                continue;
            }
            wanted.push(recipient);
        }
        wanted
    }

    async fn send_instant(&self, notification: &Notification, recipient: &Recipient) {
        let locale = self
            .deps
            .resolver
            .resolve_locale(&recipient.opaque_id, &self.default_locale)
            .await;
        let message = match self.deps.composer.compose(notification, &locale, recipient) {
            Ok(message) => message,
            Err(e) => {
                error!(user_id = %recipient.opaque_id, error = %e, "Failed to compose message");
                return;
            }
        };
        match self.deps.channel.send(&message).await {
            Ok(()) => info!(user_id = %recipient.opaque_id, "Sent notification"),
            Err(e) => error!(
                user_id = %recipient.opaque_id,
                channel = self.deps.channel.name(),
                error = %e,
                "Failed to send notification"
            ),
        }
    }
}

impl std::fmt::Debug for EventsNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventsNotifier")
            .field("default_locale", &self.default_locale)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, SendEmails, ShareCreated, SpaceShared};
    use crate::gateway::{InMemoryGateway, ResourceInfo, SpaceInfo};
    use crate::history::InMemoryEventHistory;
    use crate::providers::RecordingChannel;
    use crate::settings::{
        CollectionOption, InMemorySettings, OptionValue, SETTING_DISABLE_EMAIL,
        SETTING_EMAIL_INTERVAL, SETTING_SHARE_CREATED, SettingValue,
    };
    use crate::store::{InMemoryStore, KeyValueStore};
    use crate::templates::TemplateEngine;
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        notifier: EventsNotifier,
        settings: InMemorySettings,
        history: InMemoryEventHistory,
        store: InMemoryStore,
        channel: RecordingChannel,
    }

    /// Delays every send before recording it.
    struct SlowChannel {
        inner: RecordingChannel,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Channel for SlowChannel {
        async fn send(&self, message: &crate::models::Message) -> NotificationResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.send(message).await
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    /// Rejects writes to one key, delegates everything else.
    struct RejectingStore {
        inner: InMemoryStore,
        rejected_key: &'static str,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for RejectingStore {
        async fn read(&self, key: &str) -> NotificationResult<Option<Vec<u8>>> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, value: Vec<u8>) -> NotificationResult<()> {
            if key == self.rejected_key {
                return Err(NotificationError::Store("write rejected".into()));
            }
            self.inner.write(key, value).await
        }

        async fn delete(&self, key: &str) -> NotificationResult<()> {
            self.inner.delete(key).await
        }

        async fn list_keys(&self, prefix: &str) -> NotificationResult<Vec<String>> {
            self.inner.list_keys(prefix).await
        }
    }

    #[derive(Default)]
    struct Options {
        send_delay: Option<Duration>,
        rejected_key: Option<&'static str>,
    }

    async fn fixture() -> Fixture {
        fixture_with(Options::default()).await
    }

    async fn fixture_with(options: Options) -> Fixture {
        let store = InMemoryStore::new();
        let history = InMemoryEventHistory::new();
        let settings = InMemorySettings::new();
        let channel = RecordingChannel::new();

        let gateway = InMemoryGateway::new();
        for (id, name) in [
            ("sharer", "Dr. S. Harer"),
            ("sharee", "Eric Expireling"),
            ("u1", "User One"),
            ("u2", "User Two"),
        ] {
            gateway
                .add_user(Recipient::new(id, name, format!("{id}@owncloud.com")))
                .await;
        }
        gateway
            .add_group("team", vec!["sharer".into(), "u1".into(), "u2".into()])
            .await;
        gateway
            .add_resource(
                "board",
                ResourceInfo {
                    name: "secrets of the board".into(),
                    space_name: "Personal".into(),
                },
            )
            .await;
        gateway
            .add_space("space-1", SpaceInfo { name: "Marketing".into() })
            .await;
        let gateway: Arc<dyn Gateway> = Arc::new(gateway);

        let resolver = PreferenceResolver::new(Arc::new(settings.clone()));
        let backend: Arc<dyn KeyValueStore> = match options.rejected_key {
            Some(rejected_key) => Arc::new(RejectingStore {
                inner: store.clone(),
                rejected_key,
            }),
            None => Arc::new(store.clone()),
        };
        let accumulator = UserEventStore::new(backend, Arc::new(history.clone()));
        let mapper = EventMapper::new(gateway.clone(), "");
        let composer = MessageComposer::new(TemplateEngine::new().unwrap(), "noreply@owncloud.com");
        let channel_dyn: Arc<dyn Channel> = match options.send_delay {
            Some(delay) => Arc::new(SlowChannel {
                inner: channel.clone(),
                delay,
            }),
            None => Arc::new(channel.clone()),
        };
        let runner = DigestJobRunner::new(
            accumulator.clone(),
            mapper.clone(),
            composer.clone(),
            resolver.clone(),
            channel_dyn.clone(),
            4,
            "en",
        );

        let notifier = EventsNotifier::new(
            NotifierDeps {
                gateway,
                resolver,
                mapper,
                composer,
                accumulator,
                runner,
                channel: channel_dyn,
            },
            "en",
        );
        Fixture {
            notifier,
            settings,
            history,
            store,
            channel,
        }
    }

    fn share_created(grantee: Grantee) -> Event {
        ShareCreated {
            share_id: "share".into(),
            sharer: "sharer".into(),
            grantee,
            item_id: "board".into(),
            ctime: Utc::now(),
        }
        .to_event()
        .unwrap()
    }

    #[tokio::test]
    async fn test_instant_share_created() {
        let f = fixture().await;
        f.notifier
            .handle(share_created(Grantee::User("sharee".into())))
            .await
            .unwrap();

        let sent = f.channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Dr. S. Harer shared 'secrets of the board' with you");
        assert_eq!(sent[0].recipients, vec!["sharee@owncloud.com"]);
        assert!(sent[0]
            .text_body
            .contains("Dr. S. Harer has shared \"secrets of the board\" with you."));
    }

    #[tokio::test]
    async fn test_group_grantee_excludes_executant() {
        let f = fixture().await;
        f.notifier
            .handle(share_created(Grantee::Group("team".into())))
            .await
            .unwrap();

        let mut recipients: Vec<String> = f
            .channel
            .sent()
            .await
            .into_iter()
            .flat_map(|m| m.recipients)
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["u1@owncloud.com", "u2@owncloud.com"]);
    }

    #[tokio::test]
    async fn test_opted_out_recipients_are_dropped() {
        let f = fixture().await;
        f.settings
            .set("u1", SETTING_DISABLE_EMAIL, SettingValue::Bool(true))
            .await;
        f.settings
            .set(
                "u2",
                SETTING_SHARE_CREATED,
                SettingValue::Collection(vec![CollectionOption {
                    key: "mail".into(),
                    value: OptionValue::Bool(false),
                }]),
            )
            .await;

        f.notifier
            .handle(share_created(Grantee::Group("team".into())))
            .await
            .unwrap();
        assert_eq!(f.channel.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_grouped_recipient_is_accumulated() {
        let f = fixture().await;
        f.settings
            .set("sharee", SETTING_EMAIL_INTERVAL, SettingValue::String("daily".into()))
            .await;
        let event = share_created(Grantee::User("sharee".into()));
        f.history.record(event.clone()).await;

        f.notifier.handle(event).await.unwrap();

        assert_eq!(f.channel.sent_count().await, 0);
        assert!(f.store.read("daily_sharee").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_send_emails_signal_triggers_digest() {
        let f = fixture().await;
        f.settings
            .set("sharee", SETTING_EMAIL_INTERVAL, SettingValue::String("weekly".into()))
            .await;
        let event = share_created(Grantee::User("sharee".into()));
        f.history.record(event.clone()).await;
        f.notifier.handle(event).await.unwrap();

        let signal = SendEmails {
            interval: "weekly".into(),
        }
        .to_event()
        .unwrap();
        f.notifier.handle(signal).await.unwrap();

        for _ in 0..100 {
            if f.channel.sent_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = f.channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Report");
        assert_eq!(sent[0].sender, "noreply@owncloud.com");
    }

    #[tokio::test]
    async fn test_space_shared_link() {
        let f = fixture().await;
        let event = SpaceShared {
            executant: "sharer".into(),
            grantee: Grantee::User("sharee".into()),
            space_id: "space-1".into(),
        }
        .to_event()
        .unwrap();
        f.notifier.handle(event).await.unwrap();

        let sent = f.channel.sent().await;
        assert_eq!(sent[0].subject, "Dr. S. Harer invited you to join Marketing");
        assert!(sent[0].text_body.contains("Click here to view it: f/space-1"));
    }

    #[tokio::test]
    async fn test_unregistered_and_malformed_events() {
        let f = fixture().await;
        let unknown = Event::new("Whatever", &serde_json::json!({})).unwrap();
        assert!(f.notifier.handle(unknown).await.is_ok());

        let malformed = Event::new("ShareCreated", &serde_json::json!({"nope": true})).unwrap();
        assert!(f.notifier.handle(malformed).await.is_err());
        assert_eq!(f.channel.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_handles_events_until_shutdown() {
        let f = fixture().await;
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let notifier = f.notifier.clone();
        let handle = tokio::spawn(async move { notifier.run(rx, shutdown_rx).await });

        tx.send(share_created(Grantee::User("sharee".into())))
            .await
            .unwrap();
        for _ in 0..100 {
            if f.channel.sent_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(f.channel.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_digests() {
        let f = fixture_with(Options {
            send_delay: Some(Duration::from_millis(300)),
            ..Options::default()
        })
        .await;
        f.settings
            .set("sharee", SETTING_EMAIL_INTERVAL, SettingValue::String("daily".into()))
            .await;
        let event = share_created(Grantee::User("sharee".into()));
        f.history.record(event.clone()).await;
        f.notifier.handle(event).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let notifier = f.notifier.clone();
        let handle = tokio::spawn(async move { notifier.run(rx, shutdown_rx).await });

        tx.send(
            SendEmails {
                interval: "daily".into(),
            }
            .to_event()
            .unwrap(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(f.store.read("daily_sharee").await.unwrap().is_none());
        assert_eq!(f.channel.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_append_does_not_block_other_recipients() {
        let f = fixture_with(Options {
            rejected_key: Some("daily_u1"),
            ..Options::default()
        })
        .await;
        for user in ["u1", "u2"] {
            f.settings
                .set(user, SETTING_EMAIL_INTERVAL, SettingValue::String("daily".into()))
                .await;
        }

        f.notifier
            .handle(share_created(Grantee::Group("team".into())))
            .await
            .unwrap();

        assert!(f.store.read("daily_u1").await.unwrap().is_none());
        assert!(f.store.read("daily_u2").await.unwrap().is_some());
        assert_eq!(f.channel.sent_count().await, 0);
    }
}
