use crypto_core::TokenUse;
use tracing::info;

use super::{AuthComponents, AuthenticationService, RefreshService};
use crate::audit::{AuditEvent, AuditEventType};
use crate::error::{AuthError, Result};
use crate::metrics;
use crate::models::{LoginRequest, Principal, SessionEntry, TokenPair};
use crate::storage::bounded;

/// Entry point for whatever layer embeds the auth core.
pub struct AuthService {
    components: AuthComponents,
    authentication: AuthenticationService,
    refresh: RefreshService,
}

impl AuthService {
    pub fn new(components: AuthComponents) -> Result<Self> {
        Ok(Self {
            authentication: AuthenticationService::new(components.clone())?,
            refresh: RefreshService::new(components.clone()),
            components,
        })
    }

    pub fn components(&self) -> &AuthComponents {
        &self.components
    }

    pub async fn login(&self, identifier: &str, password: &str) -> Result<TokenPair> {
        self.authentication
            .login(LoginRequest::new(identifier, password))
            .await
    }

    pub async fn login_with(&self, request: LoginRequest) -> Result<TokenPair> {
        self.authentication.login(request).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.refresh.refresh(refresh_token).await
    }

    /// Signature, expiry, audience and token type first, then the blacklist.
    pub async fn validate_access_token(&self, token: &str) -> Result<Principal> {
        let c = &self.components;
        let claims = match c.codec.verify_as(token, TokenUse::Access).await {
            Ok(claims) => claims,
            Err(err) => {
                metrics::record_validation_failure(err.reason());
                return Err(err.into());
            }
        };

        if c.blacklist.is_revoked(&claims.jti).await? {
            metrics::record_validation_failure("revoked");
            return Err(AuthError::TokenRevoked);
        }

        Ok(Principal {
            expires_at: claims.expires_at(),
            subject: claims.sub,
            roles: claims.roles,
            scopes: claims.scopes,
            jti: claims.jti,
        })
    }

    /// Revoke the refresh token's whole family. Logging out twice is a no-op.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let c = &self.components;
        let claims = c.codec.verify_as(refresh_token, TokenUse::Refresh).await?;

        let record = bounded(
            c.storage_timeout,
            "ledger.find",
            c.ledger.find_by_jti(&claims.jti),
        )
        .await?
        .ok_or(AuthError::UnknownToken)?;

        let revoked = bounded(
            c.storage_timeout,
            "ledger.revoke_family",
            c.ledger.revoke_family(record.family_id),
        )
        .await?;
        c.remove_session(&record.username, &record.jti_hash).await;

        if revoked > 0 {
            c.publish(
                AuditEvent::new(AuditEventType::TokenRevoked, record.username.as_str(), c.clock.now())
                    .with_detail("family_id", record.family_id)
                    .with_detail("reason", "logout"),
            );
            info!(username = %record.username, family_id = %record.family_id, "logged out");
        }
        Ok(())
    }

    /// Blacklist a still-valid access token until it expires.
    pub async fn revoke_access_token(&self, access_token: &str) -> Result<()> {
        let c = &self.components;
        let claims = c.codec.verify_as(access_token, TokenUse::Access).await?;

        c.blacklist.revoke(&claims.jti, claims.expires_at()).await?;

        c.publish(
            AuditEvent::new(AuditEventType::TokenRevoked, claims.sub.as_str(), c.clock.now())
                .with_detail("reason", "access_token_revoked"),
        );
        info!(username = %claims.sub, "access token revoked");
        Ok(())
    }

    /// Revoke every refresh token of `username`. Returns how many were live.
    pub async fn logout_all(&self, username: &str) -> Result<u64> {
        let c = &self.components;
        let revoked = bounded(
            c.storage_timeout,
            "ledger.revoke_all_for_user",
            c.ledger.revoke_all_for_user(username),
        )
        .await?;
        c.clear_sessions(username).await;

        c.publish(
            AuditEvent::new(AuditEventType::TokenRevoked, username, c.clock.now())
                .with_detail("reason", "logout_all")
                .with_detail("revoked", revoked),
        );
        info!(username, revoked, "logged out everywhere");
        Ok(revoked)
    }

    pub async fn list_sessions(&self, username: &str) -> Result<Vec<SessionEntry>> {
        let c = &self.components;
        bounded(c.storage_timeout, "sessions.list", c.sessions.list(username)).await
    }
}
