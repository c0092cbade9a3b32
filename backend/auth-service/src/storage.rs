//! Deadline wrapper for every call that leaves the process.

use crate::error::{AuthError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Run a storage future under `limit`. An elapsed deadline becomes
/// [`AuthError::StorageTimeout`], never a security decision.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "storage call timed out"
            );
            Err(AuthError::StorageTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded(Duration::from_millis(50), "noop", async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_bounded_preserves_inner_error() {
        let err = bounded::<(), _>(Duration::from_millis(50), "fail", async {
            Err(AuthError::DuplicateToken)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateToken));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let err = bounded::<(), _>(Duration::from_millis(50), "slow", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::StorageTimeout));
        assert!(err.is_retryable());
    }
}
