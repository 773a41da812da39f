//! Bounded retry, idempotent verbs only (§4.1).
//!
//! POST and PATCH are never retried here: the registry happily creates a
//! second IP row for a repeated POST, so a transport-level retry would
//! silently duplicate state. GET, PUT, and DELETE are safe to repeat and
//! get up to `max_attempts` tries with exponential backoff.

use std::time::Duration;

use crate::error::NetBoxError;

/// Retry policy used by every idempotent call a [`crate::NetBoxClient`]
/// issues.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(10));
        exp.min(self.max_delay)
    }

    /// Runs `op` up to `max_attempts` times, retrying only when `op`
    /// returns a transient error, per §4.1. Non-transient errors (4xx,
    /// invariant violations, validation) return immediately on first
    /// failure since retrying would not change the outcome.
    pub async fn run_idempotent<F, Fut, T>(&self, mut op: F) -> Result<T, NetBoxError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, NetBoxError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    tokio::time::sleep(self.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = AtomicU32::new(0);
        let result = policy
            .run_idempotent(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(NetBoxError::TransientNetwork("boom".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = policy
            .run_idempotent(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NetBoxError::Validation("bad".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
