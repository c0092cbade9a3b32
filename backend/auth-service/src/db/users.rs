/// User credential lookups
use crate::models::{UserCredentials, UserStatus};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    roles: Vec<String>,
    status: String,
}

impl TryFrom<UserRow> for UserCredentials {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserCredentials {
            user_id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            roles: row.roles,
            status: row.status.parse::<UserStatus>()?,
        })
    }
}

/// Find a user by username or email, case-insensitively (excluding
/// soft-deleted users)
pub async fn find_by_username_or_email(
    pool: &PgPool,
    identifier: &str,
) -> sqlx::Result<Option<UserCredentials>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, email, password_hash, roles, status
        FROM users
        WHERE deleted_at IS NULL
          AND (LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1))
        LIMIT 1
        "#,
    )
    .bind(identifier)
    .fetch_optional(pool)
    .await?;

    row.map(UserCredentials::try_from)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(e.into()))
}
