//! Transport channels.
//!
//! This module contains the `Channel` trait and its implementations.

mod recording;
mod smtp;

pub use recording::RecordingChannel;
pub use smtp::{SmtpChannel, SmtpConfig};

use crate::error::NotificationResult;
use crate::models::Message;
use async_trait::async_trait;

/// Hands rendered messages to a delivery transport.
///
/// Errors are reported to the caller, who logs them; channels do not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, message: &Message) -> NotificationResult<()>;

    /// Get the channel name for logging.
    fn name(&self) -> &'static str;
}
