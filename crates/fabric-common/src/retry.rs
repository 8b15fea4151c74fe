//! Bounded retry with exponential backoff and jitter.
//!
//! Reconcile ticks are already retried coarsely by the controller, so the
//! retries here are short and only used around single writes that commonly
//! hit optimistic-concurrency conflicts (status patches, config map updates).

use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Backoff parameters for a retried operation.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `retryable`
/// rejects, or `config.max_attempts` is exhausted.
///
/// The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= config.max_attempts || !retryable(&e) => return Err(e),
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(jittered).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<u32, &str> = retry_with_backoff(
            &fast(5),
            "patch",
            |_| true,
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("conflict")
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_on_permanent_error() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<u32, &str> = retry_with_backoff(
            &fast(5),
            "patch",
            |e| *e != "invalid",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("invalid")
                }
            },
        )
        .await;

        assert_eq!(result, Err("invalid"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<u32, &str> = retry_with_backoff(
            &fast(3),
            "patch",
            |_| true,
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("conflict")
                }
            },
        )
        .await;

        assert_eq!(result, Err("conflict"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_with_max_attempts_never_zero() {
        assert_eq!(RetryConfig::with_max_attempts(0).max_attempts, 1);
    }
}
