//! Retry and timeout discipline for LM calls.
//!
//! Backend failures are retried with exponential backoff (attempts,
//! factor, cap from [`LmConfig`]); every attempt runs under the call
//! timeout. Cancellation, validation, and parse errors are never retried.

use std::future::Future;
use std::time::Duration;

use crate::config::LmConfig;
use crate::error::{CoreError, Result};

/// Run an LM operation under the config's timeout and retry policy.
///
/// `op` is a factory producing a fresh future per attempt. A timed-out
/// attempt is treated as a backend failure and retried like one.
pub async fn call_with_policy<T, F, Fut>(config: &LmConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry(
        config.retry_attempts,
        config.retry_factor,
        config.retry_cap,
        || {
            let fut = op();
            let timeout = config.call_timeout;
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::Backend(format!(
                        "LM call exceeded {}s ceiling",
                        timeout.as_secs()
                    ))),
                }
            }
        },
    )
    .await
}

/// Exponential-backoff retry: wait `factor * 2^attempt` seconds between
/// attempts, capped. Only [`CoreError::Backend`] is retried.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    factor: f64,
    cap: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let wait = Duration::from_secs_f64(factor * 2f64.powi(attempt as i32)).min(cap);
                tracing::debug!(
                    "LM call failed (attempt {}/{}), retrying in {:?}: {e}",
                    attempt + 1,
                    attempts,
                    wait
                );
                tokio::time::sleep(wait).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| CoreError::Backend("retry budget exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, 0.0, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_backend_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, 0.0, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::Backend("transient".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_cancellation() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, 0.0, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Cancelled) }
        })
        .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_does_not_retry_parse_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, 0.0, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Parse("bad json".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let result: Result<i32> = with_retry(2, 0.0, Duration::ZERO, || async {
            Err(CoreError::Backend("still down".to_string()))
        })
        .await;
        match result {
            Err(CoreError::Backend(msg)) => assert_eq!(msg, "still down"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_backend_error() {
        let config = LmConfig {
            call_timeout: Duration::from_millis(10),
            retry_attempts: 1,
            ..Default::default()
        };
        let result: Result<i32> = call_with_policy(&config, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(result, Err(CoreError::Backend(_))));
    }
}
