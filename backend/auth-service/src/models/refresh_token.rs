/// Refresh token ledger records
use chrono::{DateTime, Utc};
use crypto_core::hash::sha256_hex;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted refresh token. Identifiers are only ever held as SHA-256
/// hex digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct RefreshTokenRecord {
    pub jti_hash: String,
    pub family_id: Uuid,
    /// Hash of the token this one replaced; `None` for a family root.
    pub previous_jti_hash: Option<String>,
    pub username: String,
    /// Monotonic: once true it never reverts.
    pub revoked: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    pub fn is_root(&self) -> bool {
        self.previous_jti_hash.is_none()
    }
}

/// A refresh token about to be stored, still carrying plaintext
/// identifiers. Converted to a [`RefreshTokenRecord`] at the ledger boundary.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub username: String,
    pub jti: String,
    pub family_id: Uuid,
    pub previous_jti: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshToken {
    /// First token of a brand-new family.
    pub fn root(
        username: impl Into<String>,
        jti: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            jti: jti.into(),
            family_id: Uuid::new_v4(),
            previous_jti: None,
            issued_at,
            expires_at,
        }
    }

    /// Successor of `previous` within `family_id`.
    pub fn rotated(
        previous: &RefreshTokenRecord,
        previous_jti: impl Into<String>,
        jti: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: previous.username.clone(),
            jti: jti.into(),
            family_id: previous.family_id,
            previous_jti: Some(previous_jti.into()),
            issued_at,
            expires_at,
        }
    }

    pub fn jti_hash(&self) -> String {
        sha256_hex(&self.jti)
    }

    pub fn into_record(self) -> RefreshTokenRecord {
        RefreshTokenRecord {
            jti_hash: sha256_hex(&self.jti),
            family_id: self.family_id,
            previous_jti_hash: self.previous_jti.as_deref().map(sha256_hex),
            username: self.username,
            revoked: false,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}
