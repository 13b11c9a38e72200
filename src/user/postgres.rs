//! Handle database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{User, UserStore};
use crate::database::StoreError;

/// User store backed by the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new [`PgUserStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, locale, last_login, created_at, deleted_at
                FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn mark_last_login(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE users SET last_login = $1 WHERE id = $2"#)
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
