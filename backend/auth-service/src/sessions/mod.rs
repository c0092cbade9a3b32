//! Per-user registry of live logins.
//!
//! Advisory only: the ledger stays the authority on token validity, so
//! orchestration logs registry failures and carries on.

mod memory;
mod redis_store;

pub use memory::InMemorySessionRegistry;
pub use redis_store::RedisSessionRegistry;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SessionEntry;

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn register(&self, username: &str, entry: SessionEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn remove(&self, username: &str, jti_hash: &str) -> Result<bool>;

    /// Unexpired entries, soonest expiry first.
    async fn list(&self, username: &str) -> Result<Vec<SessionEntry>>;

    /// Returns how many entries were dropped.
    async fn clear(&self, username: &str) -> Result<u64>;
}
