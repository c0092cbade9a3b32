use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use crypto_core::Clock;
use dashmap::DashMap;
use std::sync::Arc;

use super::RevocationStore;
use crate::error::Result;

/// Process-local revocation store. Entries past their expiry read as absent
/// and are dropped by [`purge_expired`](Self::purge_expired).
pub struct InMemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRevocationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn insert(&self, jti_hash: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .entry(jti_hash.to_string())
            .and_modify(|current| {
                if expires_at > *current {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
        Ok(())
    }

    async fn contains(&self, jti_hash: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(jti_hash)
            .map(|expires_at| *expires_at > now)
            .unwrap_or(false))
    }
}
