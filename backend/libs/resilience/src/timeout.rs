/// Deadlines for single units of work
use std::future::Future;
use std::time::Duration;

/// Bound a fallible future by `limit`, keeping the caller's error type
///
/// An elapsed deadline becomes `on_elapsed(limit)`, so the outcome can go
/// straight into a retry predicate next to the future's own errors.
pub async fn with_timeout_result<F, T, E, M>(limit: Duration, future: F, on_elapsed: M) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    M: FnOnce(Duration) -> E,
{
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| Err(on_elapsed(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn slow(ms: u64) -> Result<u32, String> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(7)
    }

    #[tokio::test]
    async fn test_fast_future_completes() {
        let result = with_timeout_result(Duration::from_secs(1), slow(1), |_| "deadline".to_string()).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_inner_error_wins_over_deadline() {
        let result = with_timeout_result(
            Duration::from_secs(1),
            async { Err::<u32, _>("job not found".to_string()) },
            |_| "deadline".to_string(),
        )
        .await;
        assert_eq!(result, Err("job not found".to_string()));
    }

    #[tokio::test]
    async fn test_elapsed_is_mapped_into_caller_error() {
        let result = with_timeout_result(Duration::from_millis(10), slow(500), |limit| {
            format!("scoring exceeded {}ms", limit.as_millis())
        })
        .await;
        assert_eq!(result, Err("scoring exceeded 10ms".to_string()));
    }
}
