/// Orchestration of the login, refresh and revocation flows
pub mod auth_service;
pub mod authentication;
pub mod cleanup;
pub mod refresh;

pub use auth_service::AuthService;
pub use authentication::AuthenticationService;
pub use cleanup::{run_sweep, spawn_cleanup_task, CleanupSettings, MemoryStores};
pub use refresh::RefreshService;

use chrono::Duration;
use crypto_core::{Clock, IssuedToken, TokenCodec};
use std::sync::Arc;
use tracing::warn;

use crate::attempts::LoginAttemptGuard;
use crate::audit::{AuditEvent, AuditSink};
use crate::blacklist::TokenBlacklist;
use crate::error::Result;
use crate::ledger::RefreshTokenLedger;
use crate::models::{SessionEntry, TokenPair};
use crate::security::{PasswordHasher, ScopeResolver};
use crate::sessions::SessionRegistry;
use crate::storage::bounded;
use crate::users::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_ttl: Duration::seconds(900),
            refresh_ttl: Duration::days(30),
        }
    }
}

/// Everything the orchestrators need, built once at startup. Which backend
/// sits behind each port is decided by whoever constructs this.
#[derive(Clone)]
pub struct AuthComponents {
    pub codec: Arc<TokenCodec>,
    pub ledger: Arc<dyn RefreshTokenLedger>,
    pub blacklist: Arc<TokenBlacklist>,
    pub attempts: Arc<LoginAttemptGuard>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub users: Arc<dyn UserStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub scopes: Arc<ScopeResolver>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
    pub lifetimes: TokenLifetimes,
    /// Applied to every ledger, user store and session registry call.
    pub storage_timeout: std::time::Duration,
}

impl AuthComponents {
    /// Sign an access/refresh pair for `username`. The refresh token is
    /// returned separately so the caller can persist it.
    pub(crate) async fn issue_pair(
        &self,
        username: &str,
        roles: &[String],
        scopes: &[String],
    ) -> Result<(TokenPair, IssuedToken)> {
        let access = self
            .codec
            .issue_access_token(username, roles, scopes, self.lifetimes.access_ttl)
            .await?;
        let refresh = self
            .codec
            .issue_refresh_token(username, self.lifetimes.refresh_ttl)
            .await?;

        let pair = TokenPair {
            access_token: access.token,
            refresh_token: refresh.token.clone(),
            token_type: TokenPair::TOKEN_TYPE,
            expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        };
        Ok((pair, refresh))
    }

    pub(crate) async fn register_session(&self, username: &str, entry: SessionEntry) {
        let family_id = entry.family_id;
        if let Err(err) = bounded(
            self.storage_timeout,
            "sessions.register",
            self.sessions.register(username, entry),
        )
        .await
        {
            warn!(username, %family_id, error = %err, "failed to register session");
        }
    }

    pub(crate) async fn remove_session(&self, username: &str, jti_hash: &str) {
        if let Err(err) = bounded(
            self.storage_timeout,
            "sessions.remove",
            self.sessions.remove(username, jti_hash),
        )
        .await
        {
            warn!(username, error = %err, "failed to remove session");
        }
    }

    pub(crate) async fn clear_sessions(&self, username: &str) {
        if let Err(err) = bounded(
            self.storage_timeout,
            "sessions.clear",
            self.sessions.clear(username),
        )
        .await
        {
            warn!(username, error = %err, "failed to clear sessions");
        }
    }

    pub(crate) fn publish(&self, event: AuditEvent) {
        self.audit.publish(event);
    }
}
