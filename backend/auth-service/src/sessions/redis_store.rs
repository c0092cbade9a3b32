use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::Clock;
use once_cell::sync::Lazy;
use redis::Script;
use redis_utils::{run_with_timeout, SharedConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::SessionRegistry;
use crate::error::Result;
use crate::models::SessionEntry;

const KEY_PREFIX: &str = "auth:sessions:";

// KEYS[1] set, ARGV[1] member, ARGV[2] expiry ts, ARGV[3] now ts.
// Prunes lapsed members, adds the new one and keeps the key alive until
// its latest member expires.
static REGISTER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[3])
        redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
        local last = redis.call('ZRANGE', KEYS[1], -1, -1, 'WITHSCORES')
        redis.call('EXPIREAT', KEYS[1], last[2])
        return 1
        "#,
    )
});

/// One sorted set per user; members are `<jti_hash>:<family_id>`, scored by
/// expiry in unix seconds.
pub struct RedisSessionRegistry {
    redis: SharedConnectionManager,
    clock: Arc<dyn Clock>,
    command_timeout: Duration,
}

impl RedisSessionRegistry {
    pub fn new(redis: SharedConnectionManager, clock: Arc<dyn Clock>, command_timeout: Duration) -> Self {
        Self {
            redis,
            clock,
            command_timeout,
        }
    }
}

fn sessions_key(username: &str) -> String {
    format!("{KEY_PREFIX}{username}")
}

fn member(entry: &SessionEntry) -> String {
    format!("{}:{}", entry.jti_hash, entry.family_id)
}

fn parse_member(member: &str, score: f64) -> Option<SessionEntry> {
    let (jti_hash, family) = member.split_once(':')?;
    Some(SessionEntry {
        jti_hash: jti_hash.to_string(),
        family_id: Uuid::parse_str(family).ok()?,
        expires_at: DateTime::<Utc>::from_timestamp(score as i64, 0)?,
    })
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn register(&self, username: &str, entry: SessionEntry) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();
        let now = self.clock.now().timestamp();

        run_with_timeout(
            self.command_timeout,
            REGISTER
                .key(sessions_key(username))
                .arg(member(&entry))
                .arg(entry.expires_at.timestamp())
                .arg(now)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await?;

        Ok(())
    }

    async fn remove(&self, username: &str, jti_hash: &str) -> Result<bool> {
        let mut conn = self.redis.lock().await.clone();
        let key = sessions_key(username);

        let members: Vec<String> = run_with_timeout(
            self.command_timeout,
            redis::cmd("ZRANGE")
                .arg(&key)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn),
        )
        .await?;

        let prefix = format!("{jti_hash}:");
        let matching: Vec<&String> = members.iter().filter(|m| m.starts_with(&prefix)).collect();
        if matching.is_empty() {
            return Ok(false);
        }

        let removed: u64 = run_with_timeout(
            self.command_timeout,
            redis::cmd("ZREM")
                .arg(&key)
                .arg(matching)
                .query_async(&mut conn),
        )
        .await?;

        Ok(removed > 0)
    }

    async fn list(&self, username: &str) -> Result<Vec<SessionEntry>> {
        let mut conn = self.redis.lock().await.clone();
        let key = sessions_key(username);
        let now = self.clock.now().timestamp();

        let (members,): (Vec<(String, f64)>,) = run_with_timeout(
            self.command_timeout,
            redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(now)
                .ignore()
                .cmd("ZRANGE")
                .arg(&key)
                .arg(0)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(&mut conn),
        )
        .await?;

        Ok(members
            .iter()
            .filter_map(|(m, score)| {
                let parsed = parse_member(m, *score);
                if parsed.is_none() {
                    debug!(username, "skipping malformed session member");
                }
                parsed
            })
            .collect())
    }

    async fn clear(&self, username: &str) -> Result<u64> {
        let mut conn = self.redis.lock().await.clone();
        let key = sessions_key(username);

        let (count,): (u64,) = run_with_timeout(
            self.command_timeout,
            redis::pipe()
                .atomic()
                .cmd("ZCARD")
                .arg(&key)
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .query_async(&mut conn),
        )
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_round_trip() {
        let entry = SessionEntry {
            jti_hash: crypto_core::hash::sha256_hex("jti"),
            family_id: Uuid::new_v4(),
            expires_at: DateTime::<Utc>::from_timestamp(1_900_000_000, 0).unwrap(),
        };
        let encoded = member(&entry);
        let decoded = parse_member(&encoded, 1_900_000_000.0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_malformed_members_are_rejected() {
        assert!(parse_member("no-separator", 1.0).is_none());
        assert!(parse_member("hash:not-a-uuid", 1.0).is_none());
    }

    #[test]
    fn test_key_format() {
        assert_eq!(sessions_key("alice"), "auth:sessions:alice");
    }

    #[tokio::test]
    #[ignore = "requires REDIS_TEST_URL"]
    async fn test_redis_registry_cycle() {
        let url = std::env::var("REDIS_TEST_URL").expect("REDIS_TEST_URL");
        let pool = redis_utils::RedisPool::connect(&url, Duration::from_secs(2))
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(crypto_core::SystemClock);
        let registry = RedisSessionRegistry::new(pool.manager(), clock.clone(), pool.command_timeout());
        let username = format!("test-{}", Uuid::new_v4());

        let entry = SessionEntry {
            jti_hash: crypto_core::hash::sha256_hex("a"),
            family_id: Uuid::new_v4(),
            expires_at: clock.now() + chrono::Duration::minutes(5),
        };
        registry.register(&username, entry.clone()).await.unwrap();
        assert_eq!(registry.list(&username).await.unwrap().len(), 1);
        assert!(registry.remove(&username, &entry.jti_hash).await.unwrap());
        assert_eq!(registry.clear(&username).await.unwrap(), 0);
    }
}
