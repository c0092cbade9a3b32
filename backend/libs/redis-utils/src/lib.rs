//! Redis connection plumbing shared by the cache-backed auth stores.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionInfo, IntoConnectionInfo, RedisError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

/// Shared Redis connection manager guarded by a Tokio mutex.
///
/// Callers clone the manager out of the guard before issuing commands so the
/// lock is never held across a round trip.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Single-endpoint Redis connection pool.
pub struct RedisPool {
    manager: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisPool {
    /// Connect to `redis_url` and verify the server answers `PING` within
    /// `command_timeout`.
    pub async fn connect(redis_url: &str, command_timeout: Duration) -> Result<Self> {
        let info: ConnectionInfo = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let client = Client::open(info).context("failed to construct Redis client")?;

        let connection_manager = timeout(command_timeout, ConnectionManager::new(client))
            .await
            .context("timed out initializing Redis connection manager")?
            .context("failed to initialize Redis connection manager")?;

        let pool = Self {
            manager: Arc::new(Mutex::new(connection_manager)),
            command_timeout,
        };
        pool.ping().await.context("Redis did not answer PING")?;

        info!("Redis connection established");
        Ok(pool)
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await.clone();
        let pong: String = run_with_timeout(
            self.command_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await?;
        if pong != "PONG" {
            warn!(reply = %pong, "unexpected PING reply");
        }
        Ok(())
    }
}

/// Run a Redis command future, surfacing an elapsed deadline as an
/// `IoError` so callers handle it like any other connection failure.
pub async fn run_with_timeout<F, T>(limit: Duration, future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(limit, future).await {
        Ok(res) => res,
        Err(_) => Err(timeout_error()),
    }
}

fn timeout_error() -> RedisError {
    RedisError::from((redis::ErrorKind::IoError, "redis command timed out"))
}

/// True when `err` came from [`run_with_timeout`] giving up.
pub fn is_timeout(err: &RedisError) -> bool {
    err.is_timeout() || err.to_string().contains("redis command timed out")
}
