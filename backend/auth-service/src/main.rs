/// Nova Auth Service - Main entry point
///
/// Wires the token lifecycle core:
/// - RS256 codec with the configured key ring
/// - Refresh token ledger (PostgreSQL or in-memory)
/// - Blacklist, login attempts and sessions (Redis or in-memory)
/// - Expired refresh token sweep (background task)
use anyhow::{Context, Result};
use auth_service::{
    attempts::{AttemptStore, InMemoryAttemptStore, LoginAttemptGuard, RedisAttemptStore},
    audit::TracingAuditSink,
    blacklist::{InMemoryRevocationStore, RedisRevocationStore, RevocationStore, TokenBlacklist},
    config::{CacheBackend, LedgerBackend, Settings},
    ledger::{InMemoryRefreshTokenLedger, PgRefreshTokenLedger, RefreshTokenLedger},
    security::{Argon2PasswordHasher, ScopeResolver},
    services::{spawn_cleanup_task, AuthComponents, AuthService, MemoryStores},
    sessions::{InMemorySessionRegistry, RedisSessionRegistry, SessionRegistry},
    users::{InMemoryUserStore, PgUserStore, UserStore},
};
use crypto_core::{Clock, CodecConfig, SystemClock, TokenCodec};
use redis_utils::RedisPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "auth_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Auth Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let codec_config = CodecConfig::new(
        settings.jwt.issuer.clone(),
        settings.jwt.access_audience.clone(),
        settings.jwt.refresh_audience.clone(),
    )
    .with_leeway(settings.jwt.leeway_secs);
    let codec = TokenCodec::new(
        codec_config,
        &settings.jwt.key_id,
        &settings.jwt.private_key_pem,
        &settings.jwt.public_key_pem,
        clock.clone(),
    )
    .context("Failed to initialize JWT keys")?;
    for (kid, pem) in &settings.jwt.additional_public_keys {
        codec
            .trust_verification_key(kid, pem)
            .await
            .with_context(|| format!("Failed to trust verification key {kid}"))?;
    }
    info!(kid = %settings.jwt.key_id, trusted = ?codec.trusted_kids().await, "JWT keys initialized");

    let db_pool = match &settings.database {
        Some(database) => {
            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&database.url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            info!(
                max_connections = database.max_connections,
                "Database pool initialized"
            );
            Some(pool)
        }
        None => None,
    };

    let ledger: Arc<dyn RefreshTokenLedger> = match (settings.backends.ledger, &db_pool) {
        (LedgerBackend::Postgres, Some(pool)) => {
            sqlx::migrate!("./migrations")
                .run(pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations completed");
            Arc::new(PgRefreshTokenLedger::new(pool.clone()))
        }
        (LedgerBackend::Postgres, None) => {
            anyhow::bail!("PostgreSQL ledger selected without a database")
        }
        (LedgerBackend::Memory, _) => {
            warn!("Using in-memory refresh token ledger; tokens do not survive restarts");
            Arc::new(InMemoryRefreshTokenLedger::new())
        }
    };

    let users: Arc<dyn UserStore> = match &db_pool {
        Some(pool) => Arc::new(PgUserStore::new(pool.clone())),
        None => {
            warn!("No database configured; user store is empty");
            Arc::new(InMemoryUserStore::new())
        }
    };

    let mut memory_stores = MemoryStores::none();
    let (revocations, attempt_store, sessions) = match (settings.backends.cache, &settings.redis) {
        (CacheBackend::Redis, Some(redis)) => {
            let pool = RedisPool::connect(&redis.url, settings.storage_timeout)
                .await
                .context("Failed to connect to Redis")?;
            info!("Redis connection manager initialized");
            let timeout = pool.command_timeout();
            let revocations: Arc<dyn RevocationStore> =
                Arc::new(RedisRevocationStore::new(pool.manager(), timeout));
            let attempts: Arc<dyn AttemptStore> =
                Arc::new(RedisAttemptStore::new(pool.manager(), timeout));
            let sessions: Arc<dyn SessionRegistry> = Arc::new(RedisSessionRegistry::new(
                pool.manager(),
                clock.clone(),
                timeout,
            ));
            (revocations, attempts, sessions)
        }
        (CacheBackend::Redis, None) => anyhow::bail!("Redis cache selected without REDIS_URL"),
        (CacheBackend::Memory, _) => {
            warn!("Using in-memory blacklist, attempt counters and sessions");
            let revocation_store = Arc::new(InMemoryRevocationStore::new(clock.clone()));
            let attempt_store = Arc::new(InMemoryAttemptStore::new(clock.clone()));
            let session_store = Arc::new(InMemorySessionRegistry::new(clock.clone()));
            // The sweep is the only thing that shrinks these.
            memory_stores = MemoryStores {
                revocations: Some(revocation_store.clone()),
                attempts: Some(attempt_store.clone()),
                sessions: Some(session_store.clone()),
            };
            let revocations: Arc<dyn RevocationStore> = revocation_store;
            let attempts: Arc<dyn AttemptStore> = attempt_store;
            let sessions: Arc<dyn SessionRegistry> = session_store;
            (revocations, attempts, sessions)
        }
    };

    let components = AuthComponents {
        codec: Arc::new(codec),
        ledger: ledger.clone(),
        blacklist: Arc::new(TokenBlacklist::new(
            revocations,
            clock.clone(),
            settings.blacklist_failure_policy,
            settings.storage_timeout,
        )),
        attempts: Arc::new(LoginAttemptGuard::new(
            attempt_store,
            settings.lockout.clone(),
            settings.storage_timeout,
        )),
        sessions,
        users,
        hasher: Arc::new(Argon2PasswordHasher::new()),
        scopes: Arc::new(ScopeResolver::new(settings.role_scopes.clone())),
        audit: Arc::new(TracingAuditSink),
        clock: clock.clone(),
        lifetimes: settings.tokens,
        storage_timeout: settings.storage_timeout,
    };
    let _auth = AuthService::new(components).context("Failed to build auth service")?;
    info!(
        blacklist_policy = %settings.blacklist_failure_policy,
        "Auth core ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let cleanup = spawn_cleanup_task(
        ledger,
        memory_stores,
        clock,
        settings.cleanup,
        shutdown_rx,
    );

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    if let Err(err) = cleanup.await {
        warn!(error = %err, "cleanup task ended abnormally");
    }

    info!("Auth Service stopped");
    Ok(())
}
