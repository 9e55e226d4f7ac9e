/// Failure handling for the scoring workers
///
/// - **Retry**: exponential backoff with jitter, a transient-error predicate
///   and a per-retry hook; the last error and attempt count survive giving up
/// - **Timeout**: a deadline per unit of work that can feed the retry loop
/// - **Presets**: policies for batch items and repository reads
///
/// # Example: a batch item with a deadline per attempt
///
/// ```rust,no_run
/// use resilience::{batch_item_config, with_retry_if, with_timeout_result};
///
/// #[derive(Debug)]
/// enum ItemError {
///     Timeout,
///     Missing,
/// }
///
/// impl std::fmt::Display for ItemError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{:?}", self)
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let policy = batch_item_config();
///     let outcome = with_retry_if(
///         policy.retry,
///         |e: &ItemError| matches!(e, ItemError::Timeout),
///         |retry, e| eprintln!("retry {retry}: {e}"),
///         || with_timeout_result(policy.deadline, async { Ok::<_, ItemError>(77.0) }, |_| ItemError::Timeout),
///     )
///     .await;
///     println!("{:?}", outcome.map_err(|e| e.attempts()));
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{batch_item_config, data_read_config, WorkPolicy};
pub use retry::{with_retry_if, RetryConfig, RetryError};
pub use timeout::with_timeout_result;
