/// Values exchanged with whatever layer embeds the auth core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token expiry
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub const TOKEN_TYPE: &'static str = "Bearer";
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub client_ip: Option<String>,
}

impl LoginRequest {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
            client_ip: None,
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }
}

/// The authenticated caller behind a validated access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    #[serde(skip)]
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Role comparison ignores case and an optional `ROLE_` prefix.
    pub fn has_role(&self, role: &str) -> bool {
        let wanted = crate::security::scopes::normalize_role(role);
        self.roles
            .iter()
            .any(|r| crate::security::scopes::normalize_role(r) == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            subject: "alice".into(),
            roles: vec!["ADMIN".into()],
            scopes: vec!["users:read".into()],
            jti: "jti".into(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_has_scope_is_exact() {
        let p = principal();
        assert!(p.has_scope("users:read"));
        assert!(!p.has_scope("users"));
        assert!(!p.has_scope("users:write"));
    }

    #[test]
    fn test_has_role_normalises() {
        let p = principal();
        assert!(p.has_role("admin"));
        assert!(p.has_role("ROLE_ADMIN"));
        assert!(!p.has_role("USER"));
    }

    #[test]
    fn test_login_request_builder() {
        let req = LoginRequest::new("alice", "pw").with_client_ip("10.0.0.1");
        assert_eq!(req.client_ip.as_deref(), Some("10.0.0.1"));
    }
}
