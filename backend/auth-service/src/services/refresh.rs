use crypto_core::TokenUse;
use tracing::{error, info, warn};

use super::AuthComponents;
use crate::audit::{AuditEvent, AuditEventType};
use crate::error::{AuthError, Result};
use crate::metrics;
use crate::models::{NewRefreshToken, RefreshTokenRecord, SessionEntry, TokenPair};
use crate::storage::bounded;

/// Refresh-token rotation with reuse detection.
///
/// A refresh token may be exchanged exactly once. Presenting a consumed
/// token, or losing the race to consume it, is treated as theft: the whole
/// family is revoked along with every other refresh token of the user.
pub struct RefreshService {
    components: AuthComponents,
}

impl RefreshService {
    pub fn new(components: AuthComponents) -> Self {
        Self { components }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let result = self.rotate(refresh_token).await;
        match &result {
            Ok(_) => metrics::record_refresh("success"),
            Err(err) => metrics::record_refresh(err.reason()),
        }
        result
    }

    async fn rotate(&self, refresh_token: &str) -> Result<TokenPair> {
        let c = &self.components;

        let claims = match c.codec.verify_as(refresh_token, TokenUse::Refresh).await {
            Ok(claims) => claims,
            Err(err) => {
                metrics::record_validation_failure(err.reason());
                return Err(err.into());
            }
        };

        let record = bounded(
            c.storage_timeout,
            "ledger.find",
            c.ledger.find_by_jti(&claims.jti),
        )
        .await?
        .ok_or(AuthError::UnknownToken)?;

        if record.username != claims.sub {
            warn!(family_id = %record.family_id, "refresh token subject does not match ledger");
            return Err(AuthError::UnknownToken);
        }

        if record.revoked {
            return Err(self.handle_reuse(&record, "consumed_token_presented").await);
        }

        if record.is_expired_at(c.clock.now()) {
            return Err(AuthError::TokenExpired);
        }

        let user = bounded(
            c.storage_timeout,
            "users.find",
            c.users.find_by_username_or_email(&record.username),
        )
        .await?;
        let user = match user {
            Some(user) if user.is_active() => user,
            _ => {
                self.revoke_inactive(&record).await?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        // Roles are re-read on every refresh so changes apply without re-login.
        let scopes = c.scopes.resolve(&user.roles);
        let (pair, refreshed) = c.issue_pair(&user.username, &user.roles, &scopes).await?;

        let successor = NewRefreshToken::rotated(
            &record,
            claims.jti.as_str(),
            refreshed.jti.as_str(),
            refreshed.issued_at,
            refreshed.expires_at,
        );
        let successor_hash = successor.jti_hash();

        let rotated = bounded(
            c.storage_timeout,
            "ledger.rotate",
            c.ledger.rotate(&claims.jti, successor),
        )
        .await?;
        if !rotated {
            return Err(self.handle_reuse(&record, "lost_consume_race").await);
        }

        c.remove_session(&record.username, &record.jti_hash).await;
        c.register_session(
            &record.username,
            SessionEntry {
                jti_hash: successor_hash,
                family_id: record.family_id,
                expires_at: refreshed.expires_at,
            },
        )
        .await;

        let now = c.clock.now();
        c.publish(
            AuditEvent::new(AuditEventType::TokenRotated, record.username.as_str(), now)
                .with_detail("family_id", record.family_id),
        );
        c.publish(
            AuditEvent::new(AuditEventType::TokenRefresh, record.username.as_str(), now)
                .with_detail("family_id", record.family_id),
        );
        info!(username = %record.username, family_id = %record.family_id, "refresh token rotated");

        Ok(pair)
    }

    /// Revoke everything the user holds and report reuse.
    ///
    /// If either revocation fails the storage error is returned instead of
    /// `ReuseDetected`: it is retryable, and a retry lands here again because
    /// the presented token is still revoked.
    async fn handle_reuse(&self, record: &RefreshTokenRecord, trigger: &'static str) -> AuthError {
        let c = &self.components;
        error!(
            username = %record.username,
            family_id = %record.family_id,
            trigger,
            "refresh token reuse detected, revoking family"
        );

        let family_revoked = bounded(
            c.storage_timeout,
            "ledger.revoke_family",
            c.ledger.revoke_family(record.family_id),
        )
        .await;
        let user_revoked = bounded(
            c.storage_timeout,
            "ledger.revoke_all_for_user",
            c.ledger.revoke_all_for_user(&record.username),
        )
        .await;

        c.clear_sessions(&record.username).await;
        metrics::record_reuse_detected();

        let event = AuditEvent::new(
            AuditEventType::TokenReuseDetected,
            record.username.as_str(),
            c.clock.now(),
        )
        .with_detail("family_id", record.family_id)
        .with_detail("trigger", trigger);

        match (family_revoked, user_revoked) {
            (Ok(family), Ok(user)) => {
                c.publish(
                    event
                        .with_detail("revocation", "complete")
                        .with_detail("revoked", family + user),
                );
                AuthError::ReuseDetected
            }
            (Err(err), _) | (_, Err(err)) => {
                error!(
                    username = %record.username,
                    family_id = %record.family_id,
                    error = %err,
                    "revocation after reuse failed, family may still be live"
                );
                c.publish(
                    event
                        .with_detail("revocation", "failed")
                        .with_detail("error", err.reason()),
                );
                err
            }
        }
    }

    async fn revoke_inactive(&self, record: &RefreshTokenRecord) -> Result<()> {
        let c = &self.components;
        bounded(
            c.storage_timeout,
            "ledger.revoke_family",
            c.ledger.revoke_family(record.family_id),
        )
        .await?;
        c.remove_session(&record.username, &record.jti_hash).await;

        c.publish(
            AuditEvent::new(AuditEventType::TokenRevoked, record.username.as_str(), c.clock.now())
                .with_detail("family_id", record.family_id)
                .with_detail("reason", "user_inactive"),
        );
        warn!(username = %record.username, family_id = %record.family_id, "refresh refused for missing or inactive user");
        Ok(())
    }
}
