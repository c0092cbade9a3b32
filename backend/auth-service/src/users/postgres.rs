use async_trait::async_trait;
use sqlx::PgPool;

use super::UserStore;
use crate::db;
use crate::error::Result;
use crate::models::UserCredentials;

/// Reads the `users` table. The service never writes user records.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<UserCredentials>> {
        Ok(db::users::find_by_username_or_email(&self.pool, identifier.trim()).await?)
    }
}
