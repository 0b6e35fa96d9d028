//! Data models for the notifications domain.

use crate::error::{NotificationError, NotificationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Interval
// ============================================================================

/// Delivery cadence a (recipient, event) pair is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// Sent right away, one message per event.
    Instant,
    /// Accumulated and sent once a day.
    Daily,
    /// Accumulated and sent once a week.
    Weekly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Instant => "instant",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
        }
    }

    /// Unrecognized values fall back to [`Interval::Instant`].
    pub fn parse_or_instant(value: &str) -> Self {
        value.parse().unwrap_or(Interval::Instant)
    }

    /// Whether events for this interval go through the accumulator.
    pub fn is_grouped(&self) -> bool {
        !matches!(self, Interval::Instant)
    }

    /// Prefix shared by every accumulator key of this interval.
    pub fn key_prefix(&self) -> String {
        format!("{}_", self.as_str())
    }

    /// Accumulator key for `user_id` under this interval.
    pub fn record_key(&self, user_id: &str) -> String {
        format!("{}_{}", self.as_str(), user_id)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(Interval::Instant),
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            other => Err(NotificationError::UnknownInterval(other.to_string())),
        }
    }
}

// ============================================================================
// Recipients and events
// ============================================================================

/// Snapshot of a user identity supplied alongside an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub opaque_id: String,
    pub display_name: String,
    pub mail: String,
}

impl Recipient {
    pub fn new(
        opaque_id: impl Into<String>,
        display_name: impl Into<String>,
        mail: impl Into<String>,
    ) -> Self {
        Self {
            opaque_id: opaque_id.into(),
            display_name: display_name.into(),
            mail: mail.into(),
        }
    }
}

/// An opaque, typed unit of domain activity.
///
/// The payload stays serialized until a consumer decodes it by `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl Event {
    /// Wrap a serializable payload into an event with a fresh id.
    pub fn new<T: Serialize>(event_type: impl Into<String>, payload: &T) -> NotificationResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

// ============================================================================
// Accumulator records
// ============================================================================

/// Durable accumulator record stored under `interval_userId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventIds {
    pub user: Option<Recipient>,
    pub event_ids: Vec<String>,
}

/// A popped record with every event id resolved to its event.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvents {
    pub user: Recipient,
    pub events: Vec<Event>,
}

// ============================================================================
// Rendered messages
// ============================================================================

/// Inline attachment referenced from the HTML body by content id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAttachment {
    pub content_id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A fully rendered message ready for the transport channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<InlineAttachment>,
}
