use async_trait::async_trait;
use crypto_core::Clock;
use dashmap::DashMap;
use std::sync::Arc;

use super::SessionRegistry;
use crate::error::Result;
use crate::models::SessionEntry;

pub struct InMemorySessionRegistry {
    sessions: DashMap<String, Vec<SessionEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Drop expired entries across all users, and users left with none.
    /// Returns how many entries were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        self.sessions.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| !e.is_expired_at(now));
            purged += before - entries.len();
            !entries.is_empty()
        });
        purged
    }

    /// Number of users with at least one tracked entry.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn register(&self, username: &str, entry: SessionEntry) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.sessions.entry(username.to_string()).or_default();
        entries.retain(|e| !e.is_expired_at(now) && e.jti_hash != entry.jti_hash);
        entries.push(entry);
        Ok(())
    }

    async fn remove(&self, username: &str, jti_hash: &str) -> Result<bool> {
        let Some(mut entries) = self.sessions.get_mut(username) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.jti_hash != jti_hash);
        Ok(entries.len() != before)
    }

    async fn list(&self, username: &str) -> Result<Vec<SessionEntry>> {
        let now = self.clock.now();
        let Some(mut entries) = self.sessions.get_mut(username) else {
            return Ok(Vec::new());
        };
        entries.retain(|e| !e.is_expired_at(now));

        let mut live = entries.clone();
        live.sort_by_key(|e| e.expires_at);
        Ok(live)
    }

    async fn clear(&self, username: &str) -> Result<u64> {
        Ok(self
            .sessions
            .remove(username)
            .map(|(_, entries)| entries.len() as u64)
            .unwrap_or(0))
    }
}
