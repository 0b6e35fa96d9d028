//! Channel that keeps every message in memory instead of sending it.

use super::Channel;
use crate::error::{NotificationError, NotificationResult};
use crate::models::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<Message>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    #[cfg(test)]
    async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send(&self, message: &Message) -> NotificationResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Channel("recording channel set to fail".into()));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_channel_captures_and_fails_on_demand() {
        let channel = RecordingChannel::new();
        let message = Message {
            subject: "Report".into(),
            ..Default::default()
        };

        channel.send(&message).await.unwrap();
        assert_eq!(channel.sent_count().await, 1);
        assert_eq!(channel.sent().await[0].subject, "Report");

        channel.set_failing(true);
        assert!(channel.send(&message).await.is_err());
        assert_eq!(channel.sent_count().await, 1);

        channel.clear().await;
        assert_eq!(channel.sent_count().await, 0);
    }
}
