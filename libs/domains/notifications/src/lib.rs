//! Notifications Domain
//!
//! Turns sharing and space events into emails. Recipients choose whether
//! they get one mail per event (`instant`) or a grouped digest (`daily`,
//! `weekly`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Event source   │  ← Redis Stream, fed by the platform
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ EventsNotifier  │  ← Decodes, resolves recipients and preferences
//! └───┬─────────┬───┘
//!     │ instant │ daily / weekly
//!     │    ┌────▼────────────┐
//!     │    │ UserEventStore  │  ← Accumulates event ids per user
//!     │    └────┬────────────┘
//!     │         │ SendEmails{interval}
//!     │    ┌────▼────────────┐
//!     │    │ DigestJobRunner │  ← One task per pending user
//!     │    └────┬────────────┘
//!     │         │
//! ┌───▼─────────▼───┐
//! │ MessageComposer │  ← Localised text + HTML bodies
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │     Channel     │  ← SMTP
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{Event, events::{EventPayload, SendEmails}};
//!
//! // Queue everything accumulated for the daily interval.
//! let event = SendEmails { interval: "daily".into() }.to_event()?;
//! notifier.handle(event).await?;
//! ```

pub mod accumulator;
pub mod composer;
pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod gateway;
pub mod history;
pub mod l10n;
pub mod mapping;
pub mod models;
pub mod notifier;
pub mod providers;
pub mod redis;
pub mod settings;
pub mod splitter;
pub mod store;
pub mod templates;

// Re-export commonly used types
pub use accumulator::UserEventStore;
pub use composer::{MessageComposer, Notification};
pub use config::NotificationsConfig;
pub use digest::{DigestJobRunner, DigestOutcome, DigestRun};
pub use error::{NotificationError, NotificationResult};
pub use events::{DomainEvent, EventPayload};
pub use gateway::Gateway;
pub use history::EventHistory;
pub use mapping::EventMapper;
pub use models::{Event, Interval, Message, Recipient, UserEventIds, UserEvents};
pub use notifier::{EventsNotifier, NotifierDeps};
pub use providers::{Channel, SmtpChannel, SmtpConfig};
pub use settings::{PreferenceResolver, SettingsClient};
pub use splitter::{Split, split};
pub use store::KeyValueStore;
pub use templates::TemplateEngine;
