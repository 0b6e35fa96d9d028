//! Event-history collaborator: resolves event ids back to full events.

use crate::error::NotificationResult;
use crate::models::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHistory: Send + Sync {
    /// Resolve `ids` to events.
    ///
    /// The result may come back in any order and may omit ids the history no
    /// longer knows. A transport failure fails the whole call.
    async fn get_events(&self, ids: &[String]) -> NotificationResult<Vec<Event>>;
}

/// In-memory event history.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventHistory {
    events: Arc<RwLock<HashMap<String, Event>>>,
}

impl InMemoryEventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: Event) {
        self.events.write().await.insert(event.id.clone(), event);
    }
}

#[async_trait]
impl EventHistory for InMemoryEventHistory {
    async fn get_events(&self, ids: &[String]) -> NotificationResult<Vec<Event>> {
        let events = self.events.read().await;
        Ok(ids.iter().filter_map(|id| events.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_events_skips_unknown_ids() {
        let history = InMemoryEventHistory::new();
        let e1 = Event::new("ShareCreated", &serde_json::json!({})).unwrap().with_id("e1");
        history.record(e1.clone()).await;

        let events = history
            .get_events(&["e1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(events, vec![e1]);
    }
}
