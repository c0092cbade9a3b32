//! Refresh token ledger: the authority on whether a refresh token may still
//! be exchanged.
//!
//! Plaintext `jti` values cross this interface; implementations hash them
//! with SHA-256 before anything is stored or compared.

mod memory;
mod postgres;

pub use memory::InMemoryRefreshTokenLedger;
pub use postgres::PgRefreshTokenLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NewRefreshToken, RefreshTokenRecord};

#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Persist a new record. Fails with `DuplicateToken` if the hashed jti
    /// is already present.
    async fn store(&self, token: NewRefreshToken) -> Result<()>;

    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Atomically flip `revoked` from false to true. Under any number of
    /// concurrent callers for the same jti exactly one observes `true`.
    async fn consume_once(&self, jti: &str) -> Result<bool>;

    /// Consume `consumed_jti` and store `successor` as one unit. `false`
    /// means another caller consumed it first and nothing was stored.
    async fn rotate(&self, consumed_jti: &str, successor: NewRefreshToken) -> Result<bool> {
        if !self.consume_once(consumed_jti).await? {
            return Ok(false);
        }
        self.store(successor).await?;
        Ok(true)
    }

    /// Revoke every record of a family. Returns how many were still live.
    async fn revoke_family(&self, family_id: Uuid) -> Result<u64>;

    async fn revoke_all_for_user(&self, username: &str) -> Result<u64>;

    /// Remove records whose `expires_at` is strictly before `instant`.
    async fn delete_expired_before(&self, instant: DateTime<Utc>) -> Result<u64>;

    /// Records of a family, oldest first.
    async fn list_family(&self, family_id: Uuid) -> Result<Vec<RefreshTokenRecord>>;
}
