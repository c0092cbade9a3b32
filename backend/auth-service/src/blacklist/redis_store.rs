use async_trait::async_trait;
use chrono::Duration;
use redis_utils::{run_with_timeout, SharedConnectionManager};

use super::RevocationStore;
use crate::error::Result;

const KEY_PREFIX: &str = "auth:blacklist:";

/// Redis revocation store: `SET auth:blacklist:<hash> 1 EX <ttl>` and
/// `EXISTS`. Redis expiry does the cleanup.
pub struct RedisRevocationStore {
    redis: SharedConnectionManager,
    command_timeout: std::time::Duration,
}

impl RedisRevocationStore {
    pub fn new(redis: SharedConnectionManager, command_timeout: std::time::Duration) -> Self {
        Self {
            redis,
            command_timeout,
        }
    }
}

fn blacklist_key(jti_hash: &str) -> String {
    format!("{KEY_PREFIX}{jti_hash}")
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn insert(&self, jti_hash: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();
        let ttl_secs = ttl.num_seconds().max(1);

        run_with_timeout(
            self.command_timeout,
            redis::cmd("SET")
                .arg(blacklist_key(jti_hash))
                .arg(1)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn),
        )
        .await?;

        Ok(())
    }

    async fn contains(&self, jti_hash: &str) -> Result<bool> {
        let mut conn = self.redis.lock().await.clone();

        let exists: bool = run_with_timeout(
            self.command_timeout,
            redis::cmd("EXISTS")
                .arg(blacklist_key(jti_hash))
                .query_async(&mut conn),
        )
        .await?;

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let hash = crypto_core::hash::sha256_hex("jti");
        let key = blacklist_key(&hash);
        assert!(key.starts_with("auth:blacklist:"));
        assert!(!key.contains("jti"));
        assert_eq!(key.len(), KEY_PREFIX.len() + 64);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_TEST_URL"]
    async fn test_redis_round_trip() {
        let url = std::env::var("REDIS_TEST_URL").expect("REDIS_TEST_URL");
        let pool = redis_utils::RedisPool::connect(&url, std::time::Duration::from_secs(2))
            .await
            .unwrap();
        let store = RedisRevocationStore::new(pool.manager(), pool.command_timeout());

        let hash = crypto_core::hash::sha256_hex(&uuid::Uuid::new_v4().to_string());
        assert!(!store.contains(&hash).await.unwrap());
        store.insert(&hash, Duration::seconds(30)).await.unwrap();
        assert!(store.contains(&hash).await.unwrap());
    }
}
