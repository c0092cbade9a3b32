use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::hash::sha256_hex;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::RefreshTokenLedger;
use crate::error::{AuthError, Result};
use crate::models::{NewRefreshToken, RefreshTokenRecord};

/// Single-process ledger. One mutex guards the whole map, so every
/// operation, `rotate` included, is atomic.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenLedger {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn insert_locked(
        records: &mut HashMap<String, RefreshTokenRecord>,
        token: NewRefreshToken,
    ) -> Result<()> {
        let record = token.into_record();
        if records.contains_key(&record.jti_hash) {
            return Err(AuthError::DuplicateToken);
        }
        records.insert(record.jti_hash.clone(), record);
        Ok(())
    }

    fn consume_locked(records: &mut HashMap<String, RefreshTokenRecord>, jti_hash: &str) -> bool {
        match records.get_mut(jti_hash) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RefreshTokenLedger for InMemoryRefreshTokenLedger {
    async fn store(&self, token: NewRefreshToken) -> Result<()> {
        let mut records = self.records.lock().await;
        Self::insert_locked(&mut records, token)
    }

    async fn find_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&sha256_hex(jti)).cloned())
    }

    async fn consume_once(&self, jti: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        Ok(Self::consume_locked(&mut records, &sha256_hex(jti)))
    }

    async fn rotate(&self, consumed_jti: &str, successor: NewRefreshToken) -> Result<bool> {
        let mut records = self.records.lock().await;
        let successor_hash = successor.jti_hash();
        if records.contains_key(&successor_hash) {
            return Err(AuthError::DuplicateToken);
        }
        if !Self::consume_locked(&mut records, &sha256_hex(consumed_jti)) {
            return Ok(false);
        }
        Self::insert_locked(&mut records, successor)?;
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64> {
        let mut records = self.records.lock().await;
        let mut revoked = 0;
        for record in records.values_mut().filter(|r| r.family_id == family_id && !r.revoked) {
            record.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn revoke_all_for_user(&self, username: &str) -> Result<u64> {
        let mut records = self.records.lock().await;
        let mut revoked = 0;
        for record in records.values_mut().filter(|r| r.username == username && !r.revoked) {
            record.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired_before(&self, instant: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at >= instant);
        Ok((before - records.len()) as u64)
    }

    async fn list_family(&self, family_id: Uuid) -> Result<Vec<RefreshTokenRecord>> {
        let records = self.records.lock().await;
        let mut family: Vec<RefreshTokenRecord> = records
            .values()
            .filter(|r| r.family_id == family_id)
            .cloned()
            .collect();
        family.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(family)
    }
}
