//! Outstanding and blacklisted token ledger.
//!
//! Every issued refresh token is recorded as outstanding, keyed by its
//! identifying claim. Revocation creates a blacklist entry pointing at the
//! outstanding record; refresh verification consults the blacklist before
//! accepting a token. Expired records are purged by [`LedgerStore::sweep`],
//! blacklisted or not, since an expired token is already unverifiable on
//! age grounds.

mod memory;
mod postgres;

pub use memory::*;
pub use postgres::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::StoreError;

type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An outstanding record with the same identifying claim already exists.
    #[error("token {jti} is already recorded as outstanding")]
    AlreadyRecorded { jti: String },

    /// No outstanding record exists for the identifying claim.
    #[error("token {jti} has no outstanding record")]
    NotOutstanding { jti: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One issued refresh-capable token, immutable until swept.
#[derive(Clone, Debug, PartialEq)]
pub struct OutstandingToken {
    /// Identifying claim ("jti") of the token.
    pub jti: String,
    /// Owning user.
    pub user_id: String,
    /// Raw token string, kept for audit.
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Persistence seam for the revocation ledger.
///
/// All writes are atomic per identifying claim; a blacklist entry must be
/// visible to every verification that starts after `blacklist` returns.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record a newly issued token as outstanding.
    ///
    /// Recording the same identifying claim twice fails with
    /// [`LedgerError::AlreadyRecorded`]; the original `expires_at` is never
    /// overwritten.
    async fn record_outstanding(&self, record: &OutstandingToken) -> Result<()>;

    /// Whether the identifying claim has been revoked.
    async fn is_blacklisted(&self, jti: &str) -> std::result::Result<bool, StoreError>;

    /// Revoke the outstanding token carrying `jti`.
    ///
    /// Blacklisting an already-blacklisted token keeps the original
    /// revocation timestamp.
    async fn blacklist(&self, jti: &str, at: DateTime<Utc>) -> Result<()>;

    /// Delete every outstanding record with `expires_at < now`, together
    /// with its blacklist entry. Returns the number of records deleted.
    async fn sweep(&self, now: DateTime<Utc>) -> std::result::Result<u64, StoreError>;
}
