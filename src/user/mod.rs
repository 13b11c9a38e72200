mod memory;
mod postgres;

pub use memory::*;
pub use postgres::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::StoreError;

/// User as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct User {
    pub id: String,
    pub username: String,
    pub locale: String,
    #[serde(skip)]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: chrono::NaiveDate,
    pub deleted_at: Option<chrono::NaiveDate>,
}

impl User {
    /// Whether the account can still authenticate.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Persistence seam for user accounts.
///
/// Account creation and password handling live elsewhere; verification only
/// needs lookup and last-login bookkeeping.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by identifier.
    async fn find(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Record the moment of the last successful authentication.
    async fn mark_last_login(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
