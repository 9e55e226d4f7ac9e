use crate::error::{Result, ScoringError};
use crate::services::ranking::SectionConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Weights config family the engine scores with
    #[serde(default = "default_weights_name")]
    pub weights_name: String,
    /// Deadline for synchronous score and ranking requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// TTL of persisted score results
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    /// TTL of persisted batch run records
    #[serde(default = "default_batch_ttl_secs")]
    pub batch_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_user_context_ttl_secs")]
    pub user_context_ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn user_context_ttl(&self) -> Duration {
        Duration::from_secs(self.user_context_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
            user_context_ttl_secs: default_user_context_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Upper bound on (user, job) items scored at once across the run
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Users whose contexts are prepared concurrently
    #[serde(default = "default_user_parallelism")]
    pub user_parallelism: usize,
    /// Items per partition; results are flushed once per partition
    #[serde(default = "default_batch_size")]
    pub size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,
    /// Failure rate above which a run ends as PartiallyFailed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default_progress_flush_every")]
    pub progress_flush_every: u64,
    #[serde(default = "default_error_sample_limit")]
    pub error_sample_limit: usize,
    /// Catalog size cap for single-user runs without an explicit job list
    #[serde(default = "default_catalog_limit")]
    pub catalog_limit: usize,
    /// Cap on users for bulk runs over all active users
    #[serde(default = "default_active_user_limit")]
    pub active_user_limit: usize,
}

impl BatchConfig {
    /// The batch item preset with the configured overrides applied
    pub fn retry_config(&self) -> resilience::RetryConfig {
        resilience::RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..resilience::batch_item_config().retry
        }
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            user_parallelism: default_user_parallelism(),
            size: default_batch_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            item_timeout_ms: default_item_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            progress_flush_every: default_progress_flush_every(),
            error_sample_limit: default_error_sample_limit(),
            catalog_limit: default_catalog_limit(),
            active_user_limit: default_active_user_limit(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub candidate_limit: usize,
    pub sections: Vec<SectionConfig>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            sections: SectionConfig::default_digest(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RankingEnv {
    #[serde(default = "default_candidate_limit")]
    candidate_limit: usize,
    /// JSON array of section configs
    sections: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let ranking_env: RankingEnv = envy::prefixed("RANKING_").from_env()?;
        let sections = match ranking_env.sections {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                ScoringError::Configuration(format!("RANKING_SECTIONS is not valid: {}", e))
            })?,
            None => SectionConfig::default_digest(),
        };

        let config = Config {
            service: envy::from_env()?,
            database: envy::prefixed("DATABASE_").from_env()?,
            redis: envy::prefixed("REDIS_").from_env()?,
            cache: envy::prefixed("CACHE_").from_env()?,
            batch: envy::prefixed("BATCH_").from_env()?,
            ranking: RankingConfig {
                candidate_limit: ranking_env.candidate_limit,
                sections,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let batch = &self.batch;
        if batch.max_concurrency == 0 || batch.user_parallelism == 0 || batch.size == 0 {
            return Err(ScoringError::Configuration(
                "BATCH_MAX_CONCURRENCY, BATCH_USER_PARALLELISM and BATCH_SIZE must be positive"
                    .into(),
            ));
        }
        if !(0.0..=1.0).contains(&batch.failure_threshold) {
            return Err(ScoringError::Configuration(format!(
                "BATCH_FAILURE_THRESHOLD must be within [0, 1], got {}",
                batch.failure_threshold
            )));
        }
        if batch.item_timeout_ms == 0 || self.service.request_timeout_ms == 0 {
            return Err(ScoringError::Configuration(
                "BATCH_ITEM_TIMEOUT_MS and REQUEST_TIMEOUT_MS must be positive".into(),
            ));
        }
        if self.cache.ttl_secs == 0 || self.cache.max_entries == 0 {
            return Err(ScoringError::Configuration(
                "CACHE_TTL_SECS and CACHE_MAX_ENTRIES must be positive".into(),
            ));
        }
        if !matches!(self.service.log_format.as_str(), "text" | "json") {
            return Err(ScoringError::Configuration(format!(
                "LOG_FORMAT must be `text` or `json`, got {}",
                self.service.log_format
            )));
        }
        SectionConfig::validate_all(&self.ranking.sections)?;
        Ok(())
    }
}

fn default_service_name() -> String {
    "match-scoring-service".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_weights_name() -> String {
    "default".to_string()
}
fn default_request_timeout_ms() -> u64 {
    500
}
fn default_database_url() -> String {
    "postgres://localhost:5432/matching".to_string()
}
fn default_max_connections() -> u32 {
    20
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_result_ttl_secs() -> u64 {
    86_400
}
fn default_batch_ttl_secs() -> u64 {
    7 * 86_400
}
fn default_cache_ttl_secs() -> u64 {
    3_600
}
fn default_cache_max_entries() -> usize {
    2_000_000
}
fn default_user_context_ttl_secs() -> u64 {
    600
}
fn default_max_concurrency() -> usize {
    64
}
fn default_user_parallelism() -> usize {
    8
}
fn default_batch_size() -> usize {
    1_000
}
fn default_max_retries() -> u32 {
    resilience::batch_item_config().retry.max_retries
}
fn default_initial_backoff_ms() -> u64 {
    resilience::batch_item_config().retry.initial_backoff.as_millis() as u64
}
fn default_max_backoff_ms() -> u64 {
    resilience::batch_item_config().retry.max_backoff.as_millis() as u64
}
fn default_item_timeout_ms() -> u64 {
    resilience::batch_item_config().deadline.as_millis() as u64
}
fn default_failure_threshold() -> f64 {
    0.05
}
fn default_progress_flush_every() -> u64 {
    5_000
}
fn default_error_sample_limit() -> usize {
    20
}
fn default_catalog_limit() -> usize {
    100_000
}
fn default_active_user_limit() -> usize {
    1_000_000
}
fn default_candidate_limit() -> usize {
    500
}
