/// User credential facts consumed by login and refresh
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
    Locked,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
            UserStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            "locked" => Ok(UserStatus::Locked),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: Vec<String>,
    pub status: UserStatus,
}

impl UserCredentials {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("roles", &self.roles)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("Active".parse::<UserStatus>().unwrap(), UserStatus::Active);
        assert_eq!(" locked ".parse::<UserStatus>().unwrap(), UserStatus::Locked);
        assert!("banned".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_debug_hides_password_hash() {
        let user = UserCredentials {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            roles: vec!["USER".into()],
            status: UserStatus::Active,
        };
        let rendered = format!("{user:?}");
        assert!(!rendered.contains("argon2id"));
        assert!(!rendered.contains("alice@example.com"));
    }
}
