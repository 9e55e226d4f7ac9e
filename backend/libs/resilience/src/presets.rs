/// Tuned retry and deadline pairs for the scoring workloads
use crate::retry::RetryConfig;
use std::time::Duration;

/// Deadline per attempt plus the retry policy around it
#[derive(Debug, Clone)]
pub struct WorkPolicy {
    pub deadline: Duration,
    pub retry: RetryConfig,
}

/// One (user, job) item inside a batch run
///
/// Score arithmetic is cheap, so the 2s deadline is dominated by reads.
/// Three retries starting at 50ms.
pub fn batch_item_config() -> WorkPolicy {
    WorkPolicy {
        deadline: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        },
    }
}

/// Repository reads that plan or prepare work (catalog, users, contexts)
pub fn data_read_config() -> WorkPolicy {
    WorkPolicy {
        deadline: Duration::from_secs(5),
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_policy_retries_more_than_reads() {
        let item = batch_item_config();
        let read = data_read_config();
        assert!(item.retry.max_retries > read.retry.max_retries);
        assert!(item.deadline < read.deadline);
    }

    #[test]
    fn test_backoff_stays_under_cap() {
        for policy in [batch_item_config(), data_read_config()] {
            let last = policy.retry.backoff_for(policy.retry.max_retries);
            assert!(last <= policy.retry.max_backoff);
            assert!(policy.retry.initial_backoff < policy.retry.max_backoff);
        }
    }

    #[test]
    fn test_read_policy_gives_up_after_three_attempts() {
        let mut policy = data_read_config();
        policy.retry.initial_backoff = Duration::from_millis(1);

        let err = tokio_test::block_on(crate::with_retry_if(
            policy.retry,
            |_: &&str| true,
            |_, _| {},
            || async { Err::<(), _>("catalog unavailable") },
        ))
        .unwrap_err();

        assert_eq!(err.attempts(), 3);
    }
}
