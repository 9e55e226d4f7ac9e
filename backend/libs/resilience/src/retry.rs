/// Retry with exponential backoff for scoring work
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Spread applied around each backoff when jitter is on
const JITTER_SPREAD: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Randomize each wait by ±30% so retrying workers do not line up
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let growth = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * growth)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Actual wait before retry number `retry`
    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.backoff_for(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_SPREAD..JITTER_SPREAD);
        base.mul_f64(factor)
    }
}

/// Why a retried operation gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("permanent failure on attempt {attempts}: {error}")]
    NotRetryable { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable { error, .. } => error,
        }
    }

    /// Attempts made, the first one included
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::NotRetryable { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
///
/// `is_transient` classifies each error; anything it rejects ends the loop
/// with [`RetryError::NotRetryable`]. `on_retry` sees the 1-based retry
/// number and the error that caused it, before the backoff sleep.
pub async fn with_retry_if<F, Fut, T, E, P, H>(
    config: RetryConfig,
    is_transient: P,
    mut on_retry: H,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    H: FnMut(u32, &E),
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Operation recovered after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_transient(&error) {
            return Err(RetryError::NotRetryable { attempts, error });
        }
        if attempts > config.max_retries {
            warn!(attempts, %error, "Retries exhausted");
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        on_retry(attempts, &error);
        let delay = config.delay_for(attempts);
        debug!(
            retry = attempts,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            %error,
            "Retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_success_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result = with_retry_if(
            RetryConfig::default(),
            |_: &String| true,
            |_, _| panic!("no retry expected"),
            move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("scored") }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "scored");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut retries = Vec::new();

        let result = with_retry_if(
            quick(3),
            |_: &&str| true,
            |retry, _| retries.push(retry),
            move || {
                let call = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err("job row locked")
                    } else {
                        Ok(call)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result = with_retry_if(
            quick(2),
            |_: &String| true,
            |_, _| {},
            move || {
                let call = seen.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(format!("read #{} failed", call)) }
            },
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "read #2 failed");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_reports_its_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result = with_retry_if(
            quick(5),
            |e: &&str| *e == "busy",
            |_, _| {},
            move || {
                let call = seen.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(if call == 0 { "busy" } else { "missing" }) }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.into_inner(), "missing");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_grows_until_capped() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1000),
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = config.delay_for(1);
            assert!(delay >= Duration::from_millis(700) && delay <= Duration::from_millis(1300));
        }
    }

    #[tokio::test]
    async fn test_waits_between_attempts() {
        let start = std::time::Instant::now();
        let _ = with_retry_if(
            quick(3),
            |_: &&str| true,
            |_, _| {},
            || async { Err::<(), _>("down") },
        )
        .await;

        // 10 + 20 + 40 ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
