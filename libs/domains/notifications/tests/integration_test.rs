//! Integration tests for the Notifications domain
//!
//! These tests wire the full pipeline over in-memory collaborators:
//! - Instant delivery of share events
//! - Accumulation of grouped events and digest runs
//! - Interval isolation between daily and weekly records
//! - Localised digests

use chrono::Utc;
use domain_notifications::events::{EventPayload, Grantee, ShareCreated, ShareRemoved};
use domain_notifications::gateway::{InMemoryGateway, ResourceInfo};
use domain_notifications::history::InMemoryEventHistory;
use domain_notifications::providers::RecordingChannel;
use domain_notifications::settings::{
    InMemorySettings, SETTING_EMAIL_INTERVAL, SETTING_LANGUAGE, SettingValue,
};
use domain_notifications::store::InMemoryStore;
use domain_notifications::*;
use std::sync::Arc;

struct Pipeline {
    notifier: EventsNotifier,
    runner: DigestJobRunner,
    settings: InMemorySettings,
    history: InMemoryEventHistory,
    store: InMemoryStore,
    channel: RecordingChannel,
}

async fn pipeline() -> Pipeline {
    let store = InMemoryStore::new();
    let history = InMemoryEventHistory::new();
    let settings = InMemorySettings::new();
    let channel = RecordingChannel::new();

    let gateway = InMemoryGateway::new();
    gateway
        .add_user(Recipient::new("sharer", "Dr. S. Harer", "sharer@owncloud.com"))
        .await;
    gateway
        .add_user(Recipient::new("sharee", "Eric Expireling", "sharee@owncloud.com"))
        .await;
    gateway
        .add_user(Recipient::new("other", "Olga Other", "other@owncloud.com"))
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
    let gateway: Arc<dyn Gateway> = Arc::new(gateway);

    let resolver = PreferenceResolver::new(Arc::new(settings.clone()));
    let accumulator = UserEventStore::new(Arc::new(store.clone()), Arc::new(history.clone()));
    let mapper = EventMapper::new(gateway.clone(), "https://cloud.owncloud.com");
    let composer = MessageComposer::new(TemplateEngine::new().unwrap(), "noreply@owncloud.com");
    let channel_dyn: Arc<dyn Channel> = Arc::new(channel.clone());
    let runner = DigestJobRunner::new(
        accumulator.clone(),
        mapper.clone(),
        composer.clone(),
        resolver.clone(),
        channel_dyn.clone(),
        2,
        "en",
    );

    let notifier = EventsNotifier::new(
        NotifierDeps {
            gateway,
            resolver,
            mapper,
            composer,
            accumulator,
            runner: runner.clone(),
            channel: channel_dyn,
        },
        "en",
    );

    Pipeline {
        notifier,
        runner,
        settings,
        history,
        store,
        channel,
    }
}

fn share_created(grantee: &str) -> Event {
    ShareCreated {
        share_id: "share-1".into(),
        sharer: "sharer".into(),
        grantee: Grantee::User(grantee.into()),
        item_id: "board".into(),
        ctime: Utc::now(),
    }
    .to_event()
    .unwrap()
}

/// Record the event in history the way the consumer does, then handle it.
async fn deliver(p: &Pipeline, event: Event) {
    p.history.record(event.clone()).await;
    p.notifier.handle(event).await.unwrap();
}

async fn set_interval(p: &Pipeline, user: &str, interval: &str) {
    p.settings
        .set(user, SETTING_EMAIL_INTERVAL, SettingValue::String(interval.into()))
        .await;
}

// ============================================================================
// Instant delivery
// ============================================================================

#[tokio::test]
async fn test_instant_share_created_message() {
    let p = pipeline().await;
    deliver(&p, share_created("sharee")).await;

    let sent = p.channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Dr. S. Harer shared 'secrets of the board' with you");
    assert_eq!(sent[0].recipients, vec!["sharee@owncloud.com".to_string()]);
    assert_eq!(sent[0].sender, "Dr. S. Harer");
    assert!(sent[0]
        .text_body
        .contains("Dr. S. Harer has shared \"secrets of the board\" with you."));
    assert!(sent[0]
        .html_body
        .contains("<a href=\"https://cloud.owncloud.com/files/shares/with-me\">"));
    assert!(p.store.is_empty().await);
}

// ============================================================================
// Digests
// ============================================================================

#[tokio::test]
async fn test_daily_digest_groups_events_and_clears_record() {
    let p = pipeline().await;
    set_interval(&p, "sharee", "daily").await;

    deliver(&p, share_created("sharee")).await;
    deliver(&p, share_created("sharee")).await;
    assert_eq!(p.channel.sent_count().await, 0);

    let run = p.runner.run("daily").await.unwrap();
    assert_eq!(run.dispatched, 1);
    let outcomes = run.wait().await;
    assert!(matches!(
        outcomes.as_slice(),
        [DigestOutcome::Sent { events: 2, .. }]
    ));

    let sent = p.channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Report");
    assert_eq!(sent[0].recipients, vec!["sharee@owncloud.com".to_string()]);
    assert!(sent[0].text_body.starts_with("Hi Eric Expireling,"));
    assert_eq!(sent[0].text_body.matches("has shared").count(), 2);

    let store: &dyn KeyValueStore = &p.store;
    assert!(store.read("daily_sharee").await.unwrap().is_none());
}

#[tokio::test]
async fn test_daily_run_leaves_weekly_records() {
    let p = pipeline().await;
    set_interval(&p, "sharee", "daily").await;
    set_interval(&p, "other", "weekly").await;

    deliver(&p, share_created("sharee")).await;
    deliver(&p, share_created("other")).await;

    let outcomes = p.runner.run("daily").await.unwrap().wait().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].key(), "daily_sharee");

    let store: &dyn KeyValueStore = &p.store;
    assert!(store.read("weekly_other").await.unwrap().is_some());

    let outcomes = p.runner.run("weekly").await.unwrap().wait().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(p.channel.sent_count().await, 2);
    assert!(p.store.is_empty().await);
}

#[tokio::test]
async fn test_digest_is_localised() {
    let p = pipeline().await;
    set_interval(&p, "sharee", "weekly").await;
    p.settings
        .set("sharee", SETTING_LANGUAGE, SettingValue::String("de".into()))
        .await;

    deliver(&p, share_created("sharee")).await;
    deliver(
        &p,
        ShareRemoved {
            share_id: "share-1".into(),
            executant: "sharer".into(),
            grantee: Grantee::User("sharee".into()),
            item_id: "board".into(),
        }
        .to_event()
        .unwrap(),
    )
    .await;

    p.runner.run("weekly").await.unwrap().wait().await;

    let sent = p.channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text_body.starts_with("Hallo Eric Expireling,"));
}

#[tokio::test]
async fn test_events_missing_from_history_are_skipped() {
    let p = pipeline().await;
    set_interval(&p, "sharee", "daily").await;

    deliver(&p, share_created("sharee")).await;
    // Never recorded in history, e.g. expired before the run.
    p.notifier.handle(share_created("sharee")).await.unwrap();

    let outcomes = p.runner.run("daily").await.unwrap().wait().await;
    assert!(matches!(
        outcomes.as_slice(),
        [DigestOutcome::Sent { events: 1, .. }]
    ));
    assert_eq!(p.channel.sent().await[0].text_body.matches("has shared").count(), 1);
}

#[tokio::test]
async fn test_instant_interval_is_not_a_digest_run() {
    let p = pipeline().await;
    assert!(matches!(
        p.runner.run("instant").await,
        Err(NotificationError::UnknownInterval(_))
    ));
    assert!(matches!(
        p.runner.run("hourly").await,
        Err(NotificationError::UnknownInterval(_))
    ));
}
