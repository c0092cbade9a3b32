//! Read-only access to user credential facts.

mod memory;
mod postgres;

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::UserCredentials;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive lookup by username or email.
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<UserCredentials>>;
}
