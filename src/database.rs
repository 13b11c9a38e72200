//! database (db) union structure.
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "signet";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Backing store failure, transient from the caller's point of view.
///
/// Kept distinct from authentication failures so callers can retry or
/// answer 5xx instead of rejecting the credential.
#[derive(Debug, thiserror::Error)]
#[error("backing store unavailable: {0}")]
pub struct StoreError(#[from] pub sqlx::Error);

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { postgres })
    }
}
