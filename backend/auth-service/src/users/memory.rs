use async_trait::async_trait;
use dashmap::DashMap;

use super::UserStore;
use crate::error::Result;
use crate::models::{UserCredentials, UserStatus};

/// Users keyed by lower-cased username, with an email index beside them.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, UserCredentials>,
    emails: DashMap<String, String>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserCredentials) {
        let username = user.username.to_lowercase();
        self.emails.insert(user.email.to_lowercase(), username.clone());
        self.users.insert(username, user);
    }

    /// Returns false if the user does not exist.
    pub fn set_roles(&self, username: &str, roles: Vec<String>) -> bool {
        match self.users.get_mut(&username.to_lowercase()) {
            Some(mut user) => {
                user.roles = roles;
                true
            }
            None => false,
        }
    }

    /// Returns false if the user does not exist.
    pub fn set_status(&self, username: &str, status: UserStatus) -> bool {
        match self.users.get_mut(&username.to_lowercase()) {
            Some(mut user) => {
                user.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, username: &str) -> Option<UserCredentials> {
        let (_, user) = self.users.remove(&username.to_lowercase())?;
        self.emails.remove(&user.email.to_lowercase());
        Some(user)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        let key = identifier.trim().to_lowercase();
        if let Some(user) = self.users.get(&key) {
            return Ok(Some(user.clone()));
        }
        let Some(username) = self.emails.get(&key).map(|u| u.clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&username).map(|u| u.clone()))
    }
}
