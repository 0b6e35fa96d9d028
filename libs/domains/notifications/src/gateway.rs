//! Identity and storage lookups needed to address and render notifications.

use crate::error::{NotificationError, NotificationResult};
use crate::models::Recipient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What the templates need to know about a shared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    #[serde(default)]
    pub space_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub name: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_user(&self, user_id: &str) -> NotificationResult<Recipient>;

    /// Member user ids of a group.
    async fn get_group_members(&self, group_id: &str) -> NotificationResult<Vec<String>>;

    async fn stat_resource(&self, resource_id: &str) -> NotificationResult<ResourceInfo>;

    async fn get_space(&self, space_id: &str) -> NotificationResult<SpaceInfo>;
}

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<String, Recipient>,
    groups: HashMap<String, Vec<String>>,
    resources: HashMap<String, ResourceInfo>,
    spaces: HashMap<String, SpaceInfo>,
}

/// In-memory gateway.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    directory: Arc<RwLock<Directory>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: Recipient) {
        let mut dir = self.directory.write().await;
        dir.users.insert(user.opaque_id.clone(), user);
    }

    pub async fn add_group(&self, group_id: &str, members: Vec<String>) {
        let mut dir = self.directory.write().await;
        dir.groups.insert(group_id.to_string(), members);
    }

    pub async fn add_resource(&self, resource_id: &str, info: ResourceInfo) {
        let mut dir = self.directory.write().await;
        dir.resources.insert(resource_id.to_string(), info);
    }

    pub async fn add_space(&self, space_id: &str, info: SpaceInfo) {
        let mut dir = self.directory.write().await;
        dir.spaces.insert(space_id.to_string(), info);
    }
}

fn not_found(kind: &str, id: &str) -> NotificationError {
    NotificationError::Gateway(format!("{kind} '{id}' not found"))
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn get_user(&self, user_id: &str) -> NotificationResult<Recipient> {
        let dir = self.directory.read().await;
        dir.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found("user", user_id))
    }

    async fn get_group_members(&self, group_id: &str) -> NotificationResult<Vec<String>> {
        let dir = self.directory.read().await;
        dir.groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| not_found("group", group_id))
    }

    async fn stat_resource(&self, resource_id: &str) -> NotificationResult<ResourceInfo> {
        let dir = self.directory.read().await;
        dir.resources
            .get(resource_id)
            .cloned()
            .ok_or_else(|| not_found("resource", resource_id))
    }

    async fn get_space(&self, space_id: &str) -> NotificationResult<SpaceInfo> {
        let dir = self.directory.read().await;
        dir.spaces
            .get(space_id)
            .cloned()
            .ok_or_else(|| not_found("space", space_id))
    }
}
