use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::Clock;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{AttemptState, AttemptStore};
use crate::error::{AuthError, Result};

#[derive(Debug, Clone)]
struct Entry {
    count: u64,
    window_expires_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
    strikes: u64,
    strikes_expire_at: DateTime<Utc>,
}

impl Entry {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_expires_at: now,
            locked_until: None,
            strikes: 0,
            strikes_expire_at: now,
        }
    }

    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.window_expires_at > now
            || self.strikes_expire_at > now
            || self.locked_until.map_or(false, |until| until > now)
    }
}

/// Process-local attempt counters. Each key's entry is updated under its
/// shard lock, which makes every operation atomic per key.
pub struct InMemoryAttemptStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAttemptStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop keys with no live window, lock or strike.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live_at(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| AuthError::Internal("attempt duration out of range".into()))
}

fn remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptState> {
        let now = self.clock.now();
        let window = to_chrono(window)?;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::empty(now));

        if let Some(until) = entry.locked_until {
            if until > now {
                return Ok(AttemptState::Locked {
                    remaining: remaining(until, now),
                });
            }
            entry.locked_until = None;
        }

        if entry.window_expires_at <= now {
            entry.count = 0;
            entry.window_expires_at = now + window;
        }

        entry.count += 1;
        Ok(AttemptState::Counted(entry.count))
    }

    async fn register_strike(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = self.clock.now();
        let ttl = to_chrono(ttl)?;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::empty(now));

        if entry.strikes_expire_at <= now {
            entry.strikes = 0;
        }
        entry.strikes += 1;
        entry.strikes_expire_at = now + ttl;
        Ok(entry.strikes)
    }

    async fn lock(&self, key: &str, duration: Duration) -> Result<Duration> {
        let now = self.clock.now();
        let until = now + to_chrono(duration)?;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::empty(now));

        let locked_until = match entry.locked_until {
            Some(current) if current > until => current,
            _ => until,
        };
        entry.locked_until = Some(locked_until);
        entry.count = 0;
        entry.window_expires_at = now;

        Ok(remaining(locked_until, now))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
