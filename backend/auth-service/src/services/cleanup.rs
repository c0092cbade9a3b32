//! Periodic removal of expired refresh-token records, plus lapsed entries of
//! whichever process-local stores are in use.
//!
//! Housekeeping only: a skipped or delayed sweep never affects token
//! validity, since expiry is checked on every use.

use chrono::Duration;
use crypto_core::Clock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::attempts::InMemoryAttemptStore;
use crate::blacklist::InMemoryRevocationStore;
use crate::error::Result;
use crate::ledger::RefreshTokenLedger;
use crate::metrics;
use crate::sessions::InMemorySessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSettings {
    pub interval: std::time::Duration,
    /// Records are kept this long past expiry before deletion.
    pub grace: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(3600),
            grace: Duration::zero(),
        }
    }
}

/// In-memory stores that only shrink when swept. Redis-backed stores expire
/// their own keys and are left out.
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub revocations: Option<Arc<InMemoryRevocationStore>>,
    pub attempts: Option<Arc<InMemoryAttemptStore>>,
    pub sessions: Option<Arc<InMemorySessionRegistry>>,
}

impl MemoryStores {
    pub fn none() -> Self {
        Self::default()
    }

    fn purge(&self) {
        if let Some(store) = &self.revocations {
            let purged = store.purge_expired();
            debug!(purged, "purged expired blacklist entries");
        }
        if let Some(store) = &self.attempts {
            let purged = store.purge_expired();
            debug!(purged, remaining = store.len(), "purged lapsed login attempt keys");
        }
        if let Some(registry) = &self.sessions {
            let purged = registry.purge_expired();
            debug!(purged, "purged expired session entries");
        }
    }
}

/// One sweep. Returns how many ledger records were deleted.
///
/// The in-memory stores are purged even when the ledger call fails.
pub async fn run_sweep(
    ledger: &dyn RefreshTokenLedger,
    stores: &MemoryStores,
    clock: &dyn Clock,
    grace: Duration,
) -> Result<u64> {
    stores.purge();

    let cutoff = clock.now() - grace;
    let deleted = ledger.delete_expired_before(cutoff).await?;
    metrics::record_swept(deleted);

    Ok(deleted)
}

/// Run [`run_sweep`] every `settings.interval` until `shutdown` fires or its
/// sender is dropped. Failures are logged and the loop carries on.
pub fn spawn_cleanup_task(
    ledger: Arc<dyn RefreshTokenLedger>,
    stores: MemoryStores,
    clock: Arc<dyn Clock>,
    settings: CleanupSettings,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = settings.interval.as_secs(),
            grace_secs = settings.grace.num_seconds(),
            "starting refresh token cleanup task"
        );
        let mut ticker = interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match run_sweep(ledger.as_ref(), &stores, clock.as_ref(), settings.grace).await {
                        Ok(deleted) => info!(deleted, "expired refresh tokens swept"),
                        Err(err) => error!(error = %err, "refresh token sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("cleanup task stopping");
                    break;
                }
            }
        }
    })
}
