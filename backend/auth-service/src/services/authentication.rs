use tracing::{info, warn};

use super::AuthComponents;
use crate::attempts::AttemptKey;
use crate::audit::{AuditEvent, AuditEventType};
use crate::error::{AuthError, Result};
use crate::metrics;
use crate::models::{LoginRequest, NewRefreshToken, SessionEntry, TokenPair};
use crate::storage::bounded;

/// Credential login: lockout check, password verification, token issuance.
pub struct AuthenticationService {
    components: AuthComponents,
    /// Verified against when the identifier matches no user, so both paths
    /// cost one hash verification.
    dummy_hash: String,
}

impl AuthenticationService {
    pub fn new(components: AuthComponents) -> Result<Self> {
        let dummy_hash = components
            .hasher
            .hash(&uuid::Uuid::new_v4().to_string())?;
        Ok(Self {
            components,
            dummy_hash,
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<TokenPair> {
        let result = self.authenticate(&request).await;
        match &result {
            Ok(_) => metrics::record_login("success"),
            Err(err) => metrics::record_login(err.reason()),
        }
        result
    }

    async fn authenticate(&self, request: &LoginRequest) -> Result<TokenPair> {
        let c = &self.components;
        let identifier = request.identifier.trim();
        let key = AttemptKey::login(identifier, request.client_ip.as_deref());

        let decision = c.attempts.register_attempt(&key).await?;
        if !decision.allowed {
            self.record_failure(identifier, "account_locked");
            return Err(AuthError::AccountLocked {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        let found = bounded(
            c.storage_timeout,
            "users.find",
            c.users.find_by_username_or_email(identifier),
        )
        .await?;

        let user = match found {
            Some(user) if c.hasher.matches(&request.password, &user.password_hash) => user,
            Some(user) => {
                self.record_failure(&user.username, "invalid_password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                c.hasher.matches(&request.password, &self.dummy_hash);
                self.record_failure(identifier, "unknown_user");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.is_active() {
            self.record_failure(&user.username, "account_inactive");
            return Err(AuthError::AccountDisabled);
        }

        if let Err(err) = c.attempts.reset_attempts(&key).await {
            warn!(username = %user.username, error = %err, "failed to reset login attempts");
        }

        let scopes = c.scopes.resolve(&user.roles);
        let (pair, refresh) = c.issue_pair(&user.username, &user.roles, &scopes).await?;

        let record = NewRefreshToken::root(
            user.username.as_str(),
            refresh.jti.as_str(),
            refresh.issued_at,
            refresh.expires_at,
        );
        let family_id = record.family_id;
        let jti_hash = record.jti_hash();
        bounded(c.storage_timeout, "ledger.store", c.ledger.store(record)).await?;

        c.register_session(
            &user.username,
            SessionEntry {
                jti_hash,
                family_id,
                expires_at: refresh.expires_at,
            },
        )
        .await;

        c.publish(
            AuditEvent::new(AuditEventType::LoginSuccess, user.username.as_str(), c.clock.now())
                .with_detail("family_id", family_id),
        );
        info!(username = %user.username, %family_id, "login succeeded");

        Ok(pair)
    }

    fn record_failure(&self, username: &str, reason: &'static str) {
        let c = &self.components;
        c.publish(
            AuditEvent::new(AuditEventType::LoginFailure, username, c.clock.now())
                .with_detail("reason", reason),
        );
        info!(username, reason, "login failed");
    }
}
