use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{normalize, ApiError, ApiResult, CallError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Attempt budget and backoff base for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait before the attempt following `attempt_index` (0-based).
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `call` until it succeeds, fails with a non-retriable error, or the
/// attempt budget runs out. Waits are cooperative timers.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut call: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    for attempt in 0..policy.max_retries {
        let error: ApiError = match call().await {
            Ok(data) => return Ok(data),
            Err(raw) => normalize(raw),
        };

        if !error.is_retriable() {
            debug!(status = error.status, message = %error.message, "Non-retriable API error");
            return Err(error);
        }

        warn!(
            attempt = attempt + 1,
            max = policy.max_retries,
            status = error.status,
            message = %error.message,
            "Retriable API error"
        );

        if attempt + 1 < policy.max_retries {
            let wait = policy.backoff(attempt);
            debug!(wait_ms = wait.as_millis() as u64, "Retrying API call");
            tokio::time::sleep(wait).await;
        }
    }

    warn!(max = policy.max_retries, "Maximum retries exceeded");
    Err(ApiError::max_retries_exceeded())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MAX_RETRIES_MESSAGE;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn status(code: u16) -> CallError {
        CallError::Status {
            status: code,
            body: json!({"message": format!("status {}", code)}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ApiResult<()> = with_retry(RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(status(500)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.status, 0);
        assert!(err.message.to_lowercase().contains("maximum retries exceeded"));
        assert_eq!(err.message, MAX_RETRIES_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ApiResult<()> = with_retry(RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(status(404)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert_eq!(err.status, 404);
        assert_eq!(err.message, "status 404");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(RetryPolicy::default(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(status(429))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_response_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(RetryPolicy::default(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallError::NoResponse {
                        request: "GET /anomalies".to_string(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let start = Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = stamps.clone();
        let _: ApiResult<()> = with_retry(RetryPolicy::default(), || {
            log.lock().unwrap().push(start.elapsed());
            async { Err(status(502)) }
        })
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[0], Duration::ZERO);
        assert_eq!(stamps[1], Duration::from_millis(1000));
        assert_eq!(stamps[2], Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn success_on_first_call() {
        let result = with_retry(RetryPolicy::default(), || async { Ok::<_, CallError>(vec![1, 2]) }).await;
        assert_eq!(result.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn zero_budget_never_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ApiResult<()> = with_retry(RetryPolicy::new(0, Duration::from_millis(1)), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.unwrap_err(), ApiError::max_retries_exceeded());
    }

    #[test]
    fn backoff_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        let huge = policy.backoff(40);
        assert!(huge >= Duration::from_millis(1000));
    }
}
