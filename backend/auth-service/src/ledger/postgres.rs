use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::hash::sha256_hex;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RefreshTokenLedger;
use crate::db::refresh_tokens as queries;
use crate::error::Result;
use crate::models::{NewRefreshToken, RefreshTokenRecord};

/// Postgres-backed ledger.
///
/// `consume_once` is a single conditional UPDATE and relies on row-level
/// locking, so it is correct across any number of service replicas.
/// `rotate` runs in its own REPEATABLE READ transaction, independent of any
/// caller transaction.
#[derive(Debug, Clone)]
pub struct PgRefreshTokenLedger {
    pool: PgPool,
}

impl PgRefreshTokenLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_rotate(&self, consumed_hash: &str, successor: &RefreshTokenRecord) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        if !queries::mark_consumed(&mut *tx, consumed_hash).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        queries::insert(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokenLedger {
    async fn store(&self, token: NewRefreshToken) -> Result<()> {
        let record = token.into_record();
        queries::insert(&self.pool, &record).await?;
        Ok(())
    }

    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(queries::find_by_hash(&self.pool, &sha256_hex(jti)).await?)
    }

    async fn consume_once(&self, jti: &str) -> Result<bool> {
        Ok(queries::mark_consumed(&self.pool, &sha256_hex(jti)).await?)
    }

    async fn rotate(&self, consumed_jti: &str, successor: NewRefreshToken) -> Result<bool> {
        let consumed_hash = sha256_hex(consumed_jti);
        let successor = successor.into_record();

        match self.try_rotate(&consumed_hash, &successor).await {
            Ok(won) => {
                debug!(family_id = %successor.family_id, won, "rotation transaction finished");
                Ok(won)
            }
            Err(err) if queries::is_serialization_failure(&err) => {
                warn!(family_id = %successor.family_id, "rotation lost a serialization race");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        Ok(queries::revoke_family(&self.pool, family_id).await?)
    }

    async fn revoke_all_for_user(&self, username: &str) -> Result<u64> {
        Ok(queries::revoke_for_user(&self.pool, username).await?)
    }

    async fn delete_expired_before(&self, instant: DateTime<Utc>) -> Result<u64> {
        Ok(queries::delete_expired_before(&self.pool, instant).await?)
    }

    async fn list_family(&self, family_id: Uuid) -> Result<Vec<RefreshTokenRecord>> {
        Ok(queries::list_family(&self.pool, family_id).await?)
    }
}
