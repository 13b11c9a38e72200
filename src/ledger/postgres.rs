//! PostgreSQL-backed ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{LedgerError, LedgerStore, OutstandingToken, Result};
use crate::database::StoreError;

/// Ledger stored in the `outstanding_tokens` and `blacklisted_tokens`
/// tables.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a new [`PgLedger`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn record_outstanding(&self, record: &OutstandingToken) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO outstanding_tokens (jti, user_id, token, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&record.jti)
        .bind(&record.user_id)
        .bind(&record.token)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match err.as_database_error() {
            Some(db) if db.is_unique_violation() => LedgerError::AlreadyRecorded {
                jti: record.jti.clone(),
            },
            _ => StoreError(err).into(),
        })?;

        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> std::result::Result<bool, StoreError> {
        let blacklisted = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM blacklisted_tokens WHERE jti = $1)"#,
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await?;

        Ok(blacklisted)
    }

    async fn blacklist(&self, jti: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError)?;

        let result = sqlx::query(
            r#"INSERT INTO blacklisted_tokens (jti, blacklisted_at)
                SELECT jti, $2 FROM outstanding_tokens WHERE jti = $1
                ON CONFLICT (jti) DO NOTHING"#,
        )
        .bind(jti)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError)?;

        if result.rows_affected() == 0 {
            // Either already blacklisted or never outstanding.
            let outstanding = sqlx::query_scalar::<_, bool>(
                r#"SELECT EXISTS(SELECT 1 FROM outstanding_tokens WHERE jti = $1)"#,
            )
            .bind(jti)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError)?;

            if !outstanding {
                return Err(LedgerError::NotOutstanding {
                    jti: jti.to_owned(),
                });
            }
        }

        tx.commit().await.map_err(StoreError)?;
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> std::result::Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Children first: the schema has no ON DELETE CASCADE so both
        // deletes happen visibly, inside one transaction.
        sqlx::query(
            r#"DELETE FROM blacklisted_tokens
                WHERE jti IN (SELECT jti FROM outstanding_tokens WHERE expires_at < $1)"#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query(r#"DELETE FROM outstanding_tokens WHERE expires_at < $1"#)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }
}
