//! Brute-force mitigation for the login flow.
//!
//! The guard is pure mechanism: thresholds and backoff come from
//! [`LockoutPolicy`]. Counters live in an [`AttemptStore`] whose increment is
//! atomic per key, so concurrent attempts for the same key are each counted.

mod memory;
mod redis_store;

pub use memory::InMemoryAttemptStore;
pub use redis_store::RedisAttemptStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::bounded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Attempts allowed inside one window.
    pub max_attempts: u32,
    pub window: Duration,
    /// First lock duration; doubles with every consecutive lock.
    pub lockout: Duration,
    pub max_lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(900),
            lockout: Duration::from_secs(300),
            max_lockout: Duration::from_secs(3600),
        }
    }
}

impl LockoutPolicy {
    /// Duration of the `strike`-th consecutive lock:
    /// `lockout * 2^(strike-1)`, capped at `max_lockout`.
    pub fn lockout_for(&self, strike: u64) -> Duration {
        let doublings = strike.saturating_sub(1).min(32) as u32;
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.lockout
            .checked_mul(factor)
            .unwrap_or(self.max_lockout)
            .min(self.max_lockout)
    }

    /// How long consecutive locks are remembered for escalation.
    pub fn strike_memory(&self) -> Duration {
        self.max_lockout + self.window
    }
}

/// Normalised counter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey(String);

impl AttemptKey {
    /// `login:<identifier>` or `login:<identifier>:<ip>`; the identifier is
    /// trimmed and lower-cased so `Alice` and `alice ` share a counter.
    pub fn login(identifier: &str, client_ip: Option<&str>) -> Self {
        let identifier = identifier.trim().to_lowercase();
        match client_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
            Some(ip) => Self(format!("login:{identifier}:{ip}")),
            None => Self(format!("login:{identifier}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of one counted increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Counter after this attempt.
    Counted(u64),
    /// The key is locked; the attempt was not counted.
    Locked { remaining: Duration },
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Atomically: if the key is locked report the remaining lock, otherwise
    /// increment its counter (starting a `window` on first use).
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptState>;

    /// Record one more consecutive lock for the key, remembered for `ttl`.
    /// Returns the strike number, starting at 1.
    async fn register_strike(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Lock the key for at least `duration` without ever shortening an
    /// existing lock, and restart its counter. Returns the remaining lock
    /// time.
    async fn lock(&self, key: &str, duration: Duration) -> Result<Duration>;

    /// Drop the counter, the lock and the strikes.
    async fn reset(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDecision {
    pub allowed: bool,
    /// Zero when allowed, at least one otherwise.
    pub retry_after_secs: u64,
}

impl AttemptDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    fn denied(remaining: Duration) -> Self {
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        Self {
            allowed: false,
            retry_after_secs: secs.max(1),
        }
    }
}

pub struct LoginAttemptGuard {
    store: Arc<dyn AttemptStore>,
    policy: LockoutPolicy,
    timeout: Duration,
}

impl LoginAttemptGuard {
    pub fn new(store: Arc<dyn AttemptStore>, policy: LockoutPolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Count one attempt for `key` and decide whether it may proceed.
    pub async fn register_attempt(&self, key: &AttemptKey) -> Result<AttemptDecision> {
        let state = bounded(
            self.timeout,
            "attempts.increment",
            self.store.increment(key.as_str(), self.policy.window),
        )
        .await?;

        let count = match state {
            AttemptState::Locked { remaining } => return Ok(AttemptDecision::denied(remaining)),
            AttemptState::Counted(count) => count,
        };

        if count <= u64::from(self.policy.max_attempts) {
            return Ok(AttemptDecision::allowed());
        }

        let strike = bounded(
            self.timeout,
            "attempts.strike",
            self.store
                .register_strike(key.as_str(), self.policy.strike_memory()),
        )
        .await?;
        let lock = self.policy.lockout_for(strike);
        let remaining = bounded(
            self.timeout,
            "attempts.lock",
            self.store.lock(key.as_str(), lock),
        )
        .await?;

        warn!(
            key = key.as_str(),
            attempts = count,
            strike,
            lock_secs = lock.as_secs(),
            "login attempts exceeded, key locked"
        );
        Ok(AttemptDecision::denied(remaining))
    }

    pub async fn reset_attempts(&self, key: &AttemptKey) -> Result<()> {
        bounded(self.timeout, "attempts.reset", self.store.reset(key.as_str())).await?;
        info!(key = key.as_str(), "login attempts reset");
        Ok(())
    }
}
