//! Role → scope resolution.
//!
//! Scopes are `resource:action` strings. The mapping is an immutable table
//! built once at startup and handed to [`ScopeResolver`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use crate::error::{AuthError, Result};
use crate::models::Principal;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeMapError {
    #[error("empty role name")]
    EmptyRole,

    #[error("invalid scope {scope:?} for role {role}: expected resource:action")]
    InvalidScope { role: String, scope: String },

    #[error("malformed role mapping entry: {0:?}")]
    MalformedEntry(String),
}

/// Canonical role name: trimmed, upper-cased, `ROLE_` prefix removed.
pub fn normalize_role(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.strip_prefix("ROLE_") {
        Some(stripped) => stripped.to_string(),
        None => upper,
    }
}

fn validate_scope(role: &str, scope: &str) -> std::result::Result<String, ScopeMapError> {
    let scope = scope.trim();
    let valid = match scope.split_once(':') {
        Some((resource, action)) => {
            !resource.is_empty()
                && !action.is_empty()
                && !action.contains(':')
                && !scope.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(scope.to_string())
    } else {
        Err(ScopeMapError::InvalidScope {
            role: role.to_string(),
            scope: scope.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleScopeMap {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl RoleScopeMap {
    pub fn from_pairs<I, R, S>(pairs: I) -> std::result::Result<Self, ScopeMapError>
    where
        I: IntoIterator<Item = (R, Vec<S>)>,
        R: AsRef<str>,
        S: AsRef<str>,
    {
        let mut entries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (role, scopes) in pairs {
            let role = normalize_role(role.as_ref());
            if role.is_empty() {
                return Err(ScopeMapError::EmptyRole);
            }
            let slot = entries.entry(role.clone()).or_default();
            for scope in scopes {
                slot.insert(validate_scope(&role, scope.as_ref())?);
            }
        }
        Ok(Self { entries })
    }

    /// Parse `ROLE=scope,scope;ROLE2=scope` text, the `ROLE_SCOPES` format.
    pub fn parse(text: &str) -> std::result::Result<Self, ScopeMapError> {
        let mut pairs = Vec::new();
        for entry in text.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (role, scopes) = entry
                .split_once('=')
                .ok_or_else(|| ScopeMapError::MalformedEntry(entry.to_string()))?;
            let scopes: Vec<&str> = scopes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            pairs.push((role, scopes));
        }
        Self::from_pairs(pairs)
    }

    /// `USER` may read its profile; `ADMIN` additionally manages users and
    /// sessions.
    pub fn default_map() -> Self {
        let user: BTreeSet<String> = ["profile:read"].into_iter().map(String::from).collect();
        let admin: BTreeSet<String> = [
            "profile:read",
            "profile:write",
            "users:read",
            "users:write",
            "sessions:revoke",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut entries = BTreeMap::new();
        entries.insert("USER".to_string(), user);
        entries.insert("ADMIN".to_string(), admin);
        Self { entries }
    }

    pub fn scopes_for(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(&normalize_role(role))
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derives effective scopes from roles using a fixed [`RoleScopeMap`].
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    map: Arc<RoleScopeMap>,
}

impl ScopeResolver {
    pub fn new(map: RoleScopeMap) -> Self {
        Self { map: Arc::new(map) }
    }

    /// Sorted, de-duplicated union of the scopes of every known role.
    /// Unknown roles contribute nothing.
    pub fn resolve(&self, roles: &[String]) -> Vec<String> {
        let mut scopes = BTreeSet::new();
        for role in roles {
            if let Some(granted) = self.map.scopes_for(role) {
                scopes.extend(granted.iter().cloned());
            }
        }
        scopes.into_iter().collect()
    }

    pub fn map(&self) -> &RoleScopeMap {
        &self.map
    }
}

/// Authorization gate for a single scope.
pub fn require_scope(principal: &Principal, scope: &str) -> Result<()> {
    if principal.has_scope(scope) {
        Ok(())
    } else {
        Err(AuthError::InsufficientScope(scope.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_map_user() {
        let resolver = ScopeResolver::new(RoleScopeMap::default_map());
        assert_eq!(resolver.resolve(&roles(&["USER"])), vec!["profile:read"]);
    }

    #[test]
    fn test_union_is_sorted_and_deduplicated() {
        let resolver = ScopeResolver::new(RoleScopeMap::default_map());
        let scopes = resolver.resolve(&roles(&["USER", "ADMIN", "user"]));
        assert_eq!(
            scopes,
            vec![
                "profile:read",
                "profile:write",
                "sessions:revoke",
                "users:read",
                "users:write"
            ]
        );
    }

    #[test]
    fn test_unknown_roles_contribute_nothing() {
        let resolver = ScopeResolver::new(RoleScopeMap::default_map());
        assert!(resolver.resolve(&roles(&["AUDITOR"])).is_empty());
        assert!(resolver.resolve(&[]).is_empty());
    }

    #[test]
    fn test_role_normalisation() {
        assert_eq!(normalize_role(" role_admin "), "ADMIN");
        assert_eq!(normalize_role("User"), "USER");

        let resolver = ScopeResolver::new(RoleScopeMap::default_map());
        assert_eq!(resolver.resolve(&roles(&["ROLE_USER"])), vec!["profile:read"]);
    }

    #[test]
    fn test_parse_role_scopes_text() {
        let map = RoleScopeMap::parse("USER=profile:read; editor = posts:write, posts:read ;").unwrap();
        let editor = map.scopes_for("EDITOR").unwrap();
        assert!(editor.contains("posts:write"));
        assert!(editor.contains("posts:read"));
        assert_eq!(map.roles().collect::<Vec<_>>(), vec!["EDITOR", "USER"]);
    }

    #[test]
    fn test_parse_rejects_bad_scopes() {
        assert!(matches!(
            RoleScopeMap::parse("USER=profile"),
            Err(ScopeMapError::InvalidScope { .. })
        ));
        assert!(matches!(
            RoleScopeMap::parse("USER=:read"),
            Err(ScopeMapError::InvalidScope { .. })
        ));
        assert!(matches!(
            RoleScopeMap::parse("USER=a:b:c"),
            Err(ScopeMapError::InvalidScope { .. })
        ));
        assert!(matches!(
            RoleScopeMap::parse("USER profile:read"),
            Err(ScopeMapError::MalformedEntry(_))
        ));
        assert_eq!(RoleScopeMap::parse("=a:b"), Err(ScopeMapError::EmptyRole));
    }

    #[test]
    fn test_require_scope() {
        let principal = Principal {
            subject: "alice".into(),
            roles: roles(&["USER"]),
            scopes: roles(&["profile:read"]),
            jti: "j".into(),
            expires_at: Utc::now(),
        };
        assert!(require_scope(&principal, "profile:read").is_ok());
        assert!(matches!(
            require_scope(&principal, "users:write"),
            Err(AuthError::InsufficientScope(scope)) if scope == "users:write"
        ));
    }
}
