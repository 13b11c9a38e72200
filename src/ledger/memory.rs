//! In-process ledger for tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LedgerError, LedgerStore, OutstandingToken, Result};
use crate::database::StoreError;

#[derive(Default)]
struct Inner {
    outstanding: HashMap<String, OutstandingToken>,
    blacklist: HashMap<String, DateTime<Utc>>,
}

/// Ledger backed by process memory.
///
/// A single lock guards both maps, so every operation observes a consistent
/// outstanding/blacklist pair.
#[derive(Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn record_outstanding(&self, record: &OutstandingToken) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.outstanding.contains_key(&record.jti) {
            return Err(LedgerError::AlreadyRecorded {
                jti: record.jti.clone(),
            });
        }

        inner.outstanding.insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> std::result::Result<bool, StoreError> {
        Ok(self.inner.read().await.blacklist.contains_key(jti))
    }

    async fn blacklist(&self, jti: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.outstanding.contains_key(jti) {
            return Err(LedgerError::NotOutstanding {
                jti: jti.to_owned(),
            });
        }

        inner.blacklist.entry(jti.to_owned()).or_insert(at);
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> std::result::Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .outstanding
            .iter()
            .filter(|(_, record)| record.expires_at < now)
            .map(|(jti, _)| jti.clone())
            .collect();

        // Blacklist entries first, then their outstanding records.
        for jti in &expired {
            inner.blacklist.remove(jti);
            inner.outstanding.remove(jti);
        }

        Ok(expired.len() as u64)
    }
}
