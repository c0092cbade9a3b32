use crypto_core::JwtError;
use thiserror::Error;

/// Coarse classification used to decide how a failure is reported and
/// whether the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad password, unknown user, locked or disabled account.
    Credential,
    /// Structurally invalid, expired, unknown or revoked token.
    Token,
    /// Refresh-token reuse. Always paired with family revocation.
    SecuritySignal,
    Authorization,
    /// Storage unreachable, timed out, or misbehaving.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked, retry after {retry_after_secs}s")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Invalid token: {0}")]
    InvalidToken(JwtError),

    #[error("Unknown refresh token")]
    UnknownToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Missing required scope: {0}")]
    InsufficientScope(String),

    #[error("Duplicate refresh token identifier")]
    DuplicateToken,

    #[error("Storage operation timed out")]
    StorageTimeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked { .. }
            | AuthError::AccountDisabled => ErrorCategory::Credential,
            AuthError::InvalidToken(_)
            | AuthError::UnknownToken
            | AuthError::TokenExpired
            | AuthError::TokenRevoked => ErrorCategory::Token,
            AuthError::ReuseDetected => ErrorCategory::SecuritySignal,
            AuthError::InsufficientScope(_) => ErrorCategory::Authorization,
            AuthError::DuplicateToken
            | AuthError::StorageTimeout
            | AuthError::Storage(_)
            | AuthError::Internal(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Uniform message safe to hand to an untrusted caller. Never
    /// distinguishes unknown users from wrong passwords, or one token
    /// failure from another.
    pub fn public_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Credential => "invalid credentials",
            ErrorCategory::Token | ErrorCategory::SecuritySignal => "authentication failed",
            ErrorCategory::Authorization => "forbidden",
            ErrorCategory::Infrastructure => "service unavailable",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::StorageTimeout | AuthError::Storage(_) => 503,
            AuthError::DuplicateToken | AuthError::Internal(_) => 500,
            _ => match self.category() {
                ErrorCategory::Authorization => 403,
                _ => 401,
            },
        }
    }

    /// Only storage failures are worth retrying; security decisions are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StorageTimeout | AuthError::Storage(_))
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AuthError::AccountLocked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Stable label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::InvalidToken(err) => err.reason(),
            AuthError::UnknownToken => "unknown_token",
            AuthError::TokenExpired => "expired",
            AuthError::TokenRevoked => "revoked",
            AuthError::ReuseDetected => "reuse_detected",
            AuthError::InsufficientScope(_) => "insufficient_scope",
            AuthError::DuplicateToken => "duplicate_token",
            AuthError::StorageTimeout => "storage_timeout",
            AuthError::Storage(_) => "storage",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                tracing::error!("Database pool timed out");
                AuthError::StorageTimeout
            }
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AuthError::DuplicateToken
            }
            other => {
                tracing::error!(error = %other, "Database error");
                AuthError::Storage(other.to_string())
            }
        }
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        if redis_utils::is_timeout(&err) {
            tracing::error!("Redis command timed out");
            return AuthError::StorageTimeout;
        }
        tracing::error!(error = %err, "Redis error");
        AuthError::Storage(err.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.is_token_failure() {
            AuthError::InvalidToken(err)
        } else {
            tracing::error!(error = %err, "Token codec failure");
            AuthError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_share_public_message() {
        let errors = [
            AuthError::InvalidCredentials,
            AuthError::AccountLocked { retry_after_secs: 30 },
            AuthError::AccountDisabled,
        ];
        for err in errors {
            assert_eq!(err.public_message(), "invalid credentials");
            assert_eq!(err.status_code(), 401);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_token_failures_are_indistinguishable_externally() {
        let errors = [
            AuthError::InvalidToken(JwtError::InvalidSignature),
            AuthError::InvalidToken(JwtError::Expired),
            AuthError::UnknownToken,
            AuthError::TokenRevoked,
            AuthError::ReuseDetected,
        ];
        for err in errors {
            assert_eq!(err.public_message(), "authentication failed");
            assert_eq!(err.status_code(), 401);
        }
    }

    #[test]
    fn test_reuse_is_a_security_signal() {
        assert_eq!(AuthError::ReuseDetected.category(), ErrorCategory::SecuritySignal);
        assert_ne!(AuthError::UnknownToken.category(), ErrorCategory::SecuritySignal);
    }

    #[test]
    fn test_storage_timeout_is_retryable_infrastructure() {
        let err = AuthError::StorageTimeout;
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.public_message(), "service unavailable");
    }

    #[test]
    fn test_lockout_exposes_retry_after() {
        let err = AuthError::AccountLocked { retry_after_secs: 120 };
        assert_eq!(err.retry_after_secs(), Some(120));
        assert_eq!(AuthError::InvalidCredentials.retry_after_secs(), None);
    }

    #[test]
    fn test_insufficient_scope_is_forbidden() {
        let err = AuthError::InsufficientScope("users:write".into());
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.public_message(), "forbidden");
    }

    #[test]
    fn test_codec_failures_map_by_kind() {
        let token_err: AuthError = JwtError::InvalidAudience.into();
        assert!(matches!(token_err, AuthError::InvalidToken(JwtError::InvalidAudience)));
        assert_eq!(token_err.reason(), "invalid_audience");

        let internal: AuthError = JwtError::Encoding.into();
        assert!(matches!(internal, AuthError::Internal(_)));
    }

    #[test]
    fn test_pool_timeout_maps_to_storage_timeout() {
        let err: AuthError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AuthError::StorageTimeout));
    }

    #[test]
    fn test_redis_timeout_maps_to_storage_timeout() {
        let err: AuthError = redis::RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))
        .into();
        assert!(matches!(err, AuthError::StorageTimeout));
    }
}
