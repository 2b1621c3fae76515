use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{RemoteError, RemoteResult};

pub(crate) const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

pub(crate) fn is_overloaded(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return true;
    }
    if status.as_u16() == 529 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Maps a non-success response to the error taxonomy.
pub(crate) fn classify_failure(
    status: StatusCode,
    body: &str,
    message: String,
    retry_after: Option<Duration>,
) -> RemoteError {
    if is_overloaded(status, body) {
        RemoteError::Transient {
            status: status.as_u16(),
            message,
            retry_after,
        }
    } else {
        RemoteError::Terminal {
            status: status.as_u16(),
            message,
        }
    }
}

/// Runs `op` until it succeeds, fails terminally, or the attempt budget is
/// spent. Only transient errors are retried.
pub(crate) async fn with_backoff<T, F, Fut>(
    service: &str,
    policy: RetryPolicy,
    mut op: F,
) -> RemoteResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let mut wait = policy.delay_for(attempt);
                if let Some(hint) = err.retry_after()
                    && hint > wait
                {
                    wait = hint.min(MAX_DELAY);
                }
                warn!(
                    "{} overloaded; retrying in {:.1}s (attempt {}/{}): {}",
                    service,
                    wait.as_secs_f32(),
                    attempt,
                    policy.max_attempts,
                    err
                );
                sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transient() -> RemoteError {
        RemoteError::Transient {
            status: 503,
            message: "overloaded".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn delay_grows_with_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(40), MAX_DELAY);
    }

    #[test]
    fn overload_statuses_are_transient() {
        for code in [429u16, 503, 529] {
            let status = StatusCode::from_u16(code).expect("status");
            let err = classify_failure(status, "", "x".to_string(), None);
            assert!(err.is_transient(), "{code} should be transient");
        }
        for code in [400u16, 401, 403, 404, 500] {
            let status = StatusCode::from_u16(code).expect("status");
            let err = classify_failure(status, "bad key", "x".to_string(), None);
            assert!(!err.is_transient(), "{code} should be terminal");
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_budget() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: RemoteResult<()> = with_backoff("test", policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_fail_immediately() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: RemoteResult<()> = with_backoff("test", policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RemoteError::Terminal {
                    status: 401,
                    message: "unauthorized".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Terminal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = with_backoff("test", policy, |attempt| async move {
            if attempt < 2 { Err(transient()) } else { Ok(attempt) }
        })
        .await;
        assert_eq!(result.expect("second attempt succeeds"), 2);
    }
}
