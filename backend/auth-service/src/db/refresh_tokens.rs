/// Refresh token ledger queries
///
/// Every function takes a generic executor so the same statements run on the
/// pool or inside the rotation transaction.
use crate::models::RefreshTokenRecord;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

/// SQLSTATE raised when a REPEATABLE READ / SERIALIZABLE transaction loses
/// a write conflict.
const SERIALIZATION_FAILURE: &str = "40001";

pub async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    record: &RefreshTokenRecord,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (jti_hash, family_id, previous_jti_hash, username, revoked, issued_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&record.jti_hash)
    .bind(record.family_id)
    .bind(&record.previous_jti_hash)
    .bind(&record.username)
    .bind(record.revoked)
    .bind(record.issued_at)
    .bind(record.expires_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn find_by_hash<'e, E: PgExecutor<'e>>(
    executor: E,
    jti_hash: &str,
) -> sqlx::Result<Option<RefreshTokenRecord>> {
    sqlx::query_as::<_, RefreshTokenRecord>(
        r#"
        SELECT jti_hash, family_id, previous_jti_hash, username, revoked, issued_at, expires_at
        FROM refresh_tokens
        WHERE jti_hash = $1
        "#,
    )
    .bind(jti_hash)
    .fetch_optional(executor)
    .await
}

/// Conditional revoke. `true` only for the caller that flipped the flag.
pub async fn mark_consumed<'e, E: PgExecutor<'e>>(executor: E, jti_hash: &str) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked = TRUE, revoked_at = NOW()
        WHERE jti_hash = $1 AND revoked = FALSE
        "#,
    )
    .bind(jti_hash)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn revoke_family<'e, E: PgExecutor<'e>>(executor: E, family_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked = TRUE, revoked_at = NOW()
        WHERE family_id = $1 AND revoked = FALSE
        "#,
    )
    .bind(family_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn revoke_for_user<'e, E: PgExecutor<'e>>(executor: E, username: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked = TRUE, revoked_at = NOW()
        WHERE username = $1 AND revoked = FALSE
        "#,
    )
    .bind(username)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_expired_before<'e, E: PgExecutor<'e>>(
    executor: E,
    instant: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
        .bind(instant)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn list_family<'e, E: PgExecutor<'e>>(
    executor: E,
    family_id: Uuid,
) -> sqlx::Result<Vec<RefreshTokenRecord>> {
    sqlx::query_as::<_, RefreshTokenRecord>(
        r#"
        SELECT jti_hash, family_id, previous_jti_hash, username, revoked, issued_at, expires_at
        FROM refresh_tokens
        WHERE family_id = $1
        ORDER BY issued_at ASC
        "#,
    )
    .bind(family_id)
    .fetch_all(executor)
    .await
}

pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SERIALIZATION_FAILURE),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_serialization_failures() {
        assert!(!is_serialization_failure(&sqlx::Error::RowNotFound));
        assert!(!is_serialization_failure(&sqlx::Error::PoolTimedOut));
    }
}
