//! Fail-open utilities for best-effort operations
//!
//! Announcements and other provenance side effects must never abort a job
//! whose artifact already exists. Wrap them here so a failure is logged and
//! dropped.
//!
//! DO NOT use fail-open for:
//! - Stage execution (job outcome)
//! - Dedup log writes (at-most-once guarantee)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use ldn_core::fail_open::fail_open;
/// use ldn_core::Result;
///
/// async fn post_announce() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let sent = fail_open("announce", || post_announce()).await;
///     // sent is None if the post failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LdnError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, LdnError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(LdnError::Delivery("connection refused".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
