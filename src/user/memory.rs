//! In-process user store for tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{User, UserStore};
use crate::database::StoreError;

/// User store backed by process memory.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Read a user back, bypassing the [`UserStore`] seam.
    pub async fn get(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn mark_last_login(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            user.last_login = Some(at);
        }

        Ok(())
    }
}
