use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::Script;
use redis_utils::{run_with_timeout, SharedConnectionManager};
use std::time::Duration;

use super::{AttemptState, AttemptStore};
use crate::error::{AuthError, Result};

const COUNTER_PREFIX: &str = "auth:attempts:";
const LOCK_PREFIX: &str = "auth:lockout:";
const STRIKES_PREFIX: &str = "auth:strikes:";

// KEYS[1] counter, KEYS[2] lock, ARGV[1] window ms.
// Returns {1, remaining_ms} when locked, {0, count} otherwise.
static INCREMENT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local locked = redis.call('PTTL', KEYS[2])
        if locked > 0 then
            return {1, locked}
        end
        local count = redis.call('INCR', KEYS[1])
        if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
        end
        return {0, count}
        "#,
    )
});

// KEYS[1] counter, KEYS[2] lock, ARGV[1] lock ms.
// Sets or extends the lock, never shortens it, and restarts the counter.
// Returns remaining lock ms.
static EXTEND_LOCK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = redis.call('PTTL', KEYS[2])
        local wanted = tonumber(ARGV[1])
        if current < wanted then
            redis.call('SET', KEYS[2], 1, 'PX', wanted)
            current = wanted
        end
        redis.call('DEL', KEYS[1])
        return current
        "#,
    )
});

/// Redis attempt counters. Both scripts run atomically server-side, so
/// concurrent increments across instances never lose a count.
pub struct RedisAttemptStore {
    redis: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisAttemptStore {
    pub fn new(redis: SharedConnectionManager, command_timeout: Duration) -> Self {
        Self {
            redis,
            command_timeout,
        }
    }
}

fn counter_key(key: &str) -> String {
    format!("{COUNTER_PREFIX}{key}")
}

fn lock_key(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

fn strikes_key(key: &str) -> String {
    format!("{STRIKES_PREFIX}{key}")
}

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

fn decode_increment(reply: &[i64]) -> Result<AttemptState> {
    match reply {
        [1, remaining_ms] => Ok(AttemptState::Locked {
            remaining: Duration::from_millis((*remaining_ms).max(0) as u64),
        }),
        [0, count] => Ok(AttemptState::Counted((*count).max(0) as u64)),
        other => Err(AuthError::Storage(format!(
            "unexpected attempt script reply: {other:?}"
        ))),
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptState> {
        let mut conn = self.redis.lock().await.clone();

        let reply: Vec<i64> = run_with_timeout(
            self.command_timeout,
            INCREMENT
                .key(counter_key(key))
                .key(lock_key(key))
                .arg(millis(window))
                .invoke_async(&mut conn),
        )
        .await?;

        decode_increment(&reply)
    }

    async fn register_strike(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.redis.lock().await.clone();
        let strikes = strikes_key(key);

        let (strike,): (u64,) = run_with_timeout(
            self.command_timeout,
            redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(&strikes)
                .cmd("PEXPIRE")
                .arg(&strikes)
                .arg(millis(ttl))
                .ignore()
                .query_async(&mut conn),
        )
        .await?;

        Ok(strike)
    }

    async fn lock(&self, key: &str, duration: Duration) -> Result<Duration> {
        let mut conn = self.redis.lock().await.clone();

        let remaining_ms: i64 = run_with_timeout(
            self.command_timeout,
            EXTEND_LOCK
                .key(counter_key(key))
                .key(lock_key(key))
                .arg(millis(duration))
                .invoke_async(&mut conn),
        )
        .await?;

        Ok(Duration::from_millis(remaining_ms.max(0) as u64))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();

        run_with_timeout(
            self.command_timeout,
            redis::cmd("DEL")
                .arg(counter_key(key))
                .arg(lock_key(key))
                .arg(strikes_key(key))
                .query_async::<_, ()>(&mut conn),
        )
        .await?;

        Ok(())
    }
}
