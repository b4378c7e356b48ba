//! Bounded exponential backoff with jitter, aware of cancellation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification hooks the retry loop needs from an error type.
///
/// Transport errors implement this so the loop can distinguish transient
/// failures (timeouts, resets, 5xx, rate limits) from permanent ones (auth,
/// other 4xx) and honor server-provided retry hints.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided delay hint (e.g. a `Retry-After` header), if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// The error value surfaced when the cancellation token trips mid-retry.
    fn cancelled() -> Self;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), capped and jittered.
    fn backoff_for<E: Retryable>(&self, attempt: u32, last_error: &E) -> Duration {
        let base = match last_error.retry_after() {
            Some(hint) => hint,
            None => {
                let exp = self
                    .initial_backoff
                    .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
                exp.min(self.max_backoff)
            }
        };
        base + jitter_for(base)
    }
}

/// Up to 10% of the delay, derived from the clock's subsecond nanos.
fn jitter_for(delay: Duration) -> Duration {
    let window_ms = (delay.as_millis() as u64 / 10).max(1);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    Duration::from_millis(nanos % window_ms)
}

/// Run `op` until it succeeds, fails permanently, exhausts the policy, or the
/// token trips.
///
/// Every backoff sleep races the cancellation token; a trip surfaces as
/// `E::cancelled()` without issuing further attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }

        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_retryable() {
                    debug!(operation, error = %e, "Error is not retryable");
                    return Err(e);
                }
                if attempt >= policy.max_retries {
                    warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }

                attempt += 1;
                let delay = policy.backoff_for(attempt, &e);
                debug!(
                    operation,
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(E::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
        Cancelled,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient)
        }

        fn cancelled() -> Self {
            Self::Cancelled
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, 1, 5)
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let cancel = CancellationToken::new();
        let result: Result<u32, TestError> =
            retry_with_backoff(&fast_policy(), &cancel, "test", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> =
            retry_with_backoff(&fast_policy(), &cancel, "test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_permanent_errors() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> =
            retry_with_backoff(&fast_policy(), &cancel, "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Permanent)
            })
            .await;
        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_bounded_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> =
            retry_with_backoff(&fast_policy(), &cancel, "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await;
        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(
            &RetryPolicy::new(5, 10_000, 60_000),
            &cancel,
            "test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            },
        )
        .await;
        assert!(matches!(result, Err(TestError::Cancelled)));
        // The token is checked before the first attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
