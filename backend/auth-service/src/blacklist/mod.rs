//! Access token blacklist.
//!
//! Lets a still-valid access token be revoked before it expires. Entries are
//! keyed by the SHA-256 of the token's `jti` and live no longer than the
//! token itself.

mod memory;
mod redis_store;

pub use memory::InMemoryRevocationStore;
pub use redis_store::RedisRevocationStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use crypto_core::hash::sha256_hex;
use crypto_core::Clock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::Result;
use crate::metrics;
use crate::storage::bounded;

/// Storage port behind [`TokenBlacklist`]. Keys are already hashed.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn insert(&self, jti_hash: &str, ttl: Duration) -> Result<()>;

    async fn contains(&self, jti_hash: &str) -> Result<bool>;
}

/// What `is_revoked` answers when the backing store cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlacklistFailurePolicy {
    /// Treat the token as not revoked. Keeps the service available while
    /// the store is down, at the cost of honouring explicitly revoked
    /// tokens until they expire.
    #[default]
    FailOpen,
    /// Surface the storage error; every authenticated request fails while
    /// the store is down.
    FailClosed,
}

impl FromStr for BlacklistFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-open" | "open" => Ok(Self::FailOpen),
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown blacklist failure policy: {other}")),
        }
    }
}

impl fmt::Display for BlacklistFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailOpen => "fail-open",
            Self::FailClosed => "fail-closed",
        })
    }
}

pub struct TokenBlacklist {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    policy: BlacklistFailurePolicy,
    timeout: std::time::Duration,
}

impl TokenBlacklist {
    pub fn new(
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
        policy: BlacklistFailurePolicy,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> BlacklistFailurePolicy {
        self.policy
    }

    /// Blacklist `jti` until `expires_at`. A token that is already expired
    /// needs no entry.
    pub async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
        if jti.trim().is_empty() {
            return Ok(());
        }

        let remaining = expires_at - self.clock.now();
        if remaining <= Duration::zero() {
            debug!("skipping blacklist entry for already expired token");
            return Ok(());
        }

        let ttl = Duration::seconds(ceil_secs(remaining).max(1));
        bounded(
            self.timeout,
            "blacklist.revoke",
            self.store.insert(&sha256_hex(jti), ttl),
        )
        .await
    }

    /// Blank identifiers are never revoked. Store failures follow the
    /// configured [`BlacklistFailurePolicy`].
    pub async fn is_revoked(&self, jti: &str) -> Result<bool> {
        if jti.trim().is_empty() {
            return Ok(false);
        }

        match bounded(
            self.timeout,
            "blacklist.lookup",
            self.store.contains(&sha256_hex(jti)),
        )
        .await
        {
            Ok(revoked) => Ok(revoked),
            Err(err) => match self.policy {
                BlacklistFailurePolicy::FailOpen => {
                    error!(
                        error = %err,
                        policy = %self.policy,
                        "blacklist lookup failed, treating token as not revoked"
                    );
                    metrics::record_blacklist_fail_open();
                    Ok(false)
                }
                BlacklistFailurePolicy::FailClosed => {
                    error!(error = %err, policy = %self.policy, "blacklist lookup failed");
                    Err(err)
                }
            },
        }
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(duration: Duration) -> i64 {
    let secs = duration.num_seconds();
    if duration > Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crypto_core::ManualClock;
    use mockall::mock;

    mock! {
        Store {}

        #[async_trait]
        impl RevocationStore for Store {
            async fn insert(&self, jti_hash: &str, ttl: Duration) -> Result<()>;
            async fn contains(&self, jti_hash: &str) -> Result<bool>;
        }
    }

    fn blacklist_with(store: MockStore, policy: BlacklistFailurePolicy) -> (TokenBlacklist, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let blacklist = TokenBlacklist::new(
            Arc::new(store),
            clock.clone(),
            policy,
            std::time::Duration::from_millis(200),
        );
        (blacklist, clock)
    }

    #[tokio::test]
    async fn test_revoke_hashes_jti_and_aligns_ttl() {
        let mut store = MockStore::new();
        store
            .expect_insert()
            .withf(|hash, ttl| *hash == sha256_hex("jti-1") && *ttl == Duration::seconds(600))
            .times(1)
            .returning(|_, _| Ok(()));

        let (blacklist, clock) = blacklist_with(store, BlacklistFailurePolicy::FailOpen);
        let expires_at = clock.now() + Duration::seconds(600);
        blacklist.revoke("jti-1", expires_at).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_of_expired_token_is_noop() {
        let mut store = MockStore::new();
        store.expect_insert().never();

        let (blacklist, clock) = blacklist_with(store, BlacklistFailurePolicy::FailOpen);
        blacklist.revoke("jti-1", clock.now()).await.unwrap();
        blacklist.revoke("", clock.now() + Duration::hours(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_jti_is_never_revoked() {
        let mut store = MockStore::new();
        store.expect_contains().never();

        let (blacklist, _) = blacklist_with(store, BlacklistFailurePolicy::FailClosed);
        assert!(!blacklist.is_revoked("").await.unwrap());
        assert!(!blacklist.is_revoked("   ").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_open_policy() {
        let mut store = MockStore::new();
        store
            .expect_contains()
            .returning(|_| Err(AuthError::Storage("connection refused".into())));

        let (blacklist, _) = blacklist_with(store, BlacklistFailurePolicy::FailOpen);
        assert!(!blacklist.is_revoked("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_closed_policy() {
        let mut store = MockStore::new();
        store
            .expect_contains()
            .returning(|_| Err(AuthError::StorageTimeout));

        let (blacklist, _) = blacklist_with(store, BlacklistFailurePolicy::FailClosed);
        let err = blacklist.is_revoked("jti-1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("fail-open".parse(), Ok(BlacklistFailurePolicy::FailOpen));
        assert_eq!("FAIL_CLOSED".parse(), Ok(BlacklistFailurePolicy::FailClosed));
        assert!("sometimes".parse::<BlacklistFailurePolicy>().is_err());
        assert_eq!(BlacklistFailurePolicy::default(), BlacklistFailurePolicy::FailOpen);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::milliseconds(1500)), 2);
        assert_eq!(ceil_secs(Duration::seconds(3)), 3);
        assert_eq!(ceil_secs(Duration::milliseconds(1)), 1);
    }
}
