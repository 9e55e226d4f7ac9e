use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Debug, Clone, Error)]
pub enum ScoringError {
    /// Malformed weights config or request parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced job/user/action record could not be read
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Computation timed out after {0}ms")]
    ComputationTimeout(u64),

    /// Cached entry built against a different weights version
    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error classes exposed to callers of the synchronous scoring API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    InvalidInput,
    Timeout,
    Internal,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::InvalidInput => "invalid_input",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Internal => "internal",
        }
    }
}

impl ScoringError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            ScoringError::NotFound(_) => ApiErrorKind::NotFound,
            ScoringError::Validation(_) | ScoringError::Configuration(_) => {
                ApiErrorKind::InvalidInput
            }
            ScoringError::ComputationTimeout(_) => ApiErrorKind::Timeout,
            _ => ApiErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScoringError::DataUnavailable(_)
                | ScoringError::ComputationTimeout(_)
                | ScoringError::Database(_)
                | ScoringError::Redis(_)
                | ScoringError::CacheInconsistency(_)
        )
    }

    /// Short label used for error summaries and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ScoringError::Validation(_) => "validation",
            ScoringError::DataUnavailable(_) => "data_unavailable",
            ScoringError::NotFound(_) => "not_found",
            ScoringError::ComputationTimeout(_) => "timeout",
            ScoringError::CacheInconsistency(_) => "cache_inconsistency",
            ScoringError::Database(_) => "database",
            ScoringError::Redis(_) => "redis",
            ScoringError::Serialization(_) => "serialization",
            ScoringError::Configuration(_) => "configuration",
            ScoringError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for ScoringError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ScoringError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                ScoringError::DataUnavailable(err.to_string())
            }
            _ => ScoringError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for ScoringError {
    fn from(err: redis::RedisError) -> Self {
        ScoringError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(err: serde_json::Error) -> Self {
        ScoringError::Serialization(err.to_string())
    }
}

impl From<envy::Error> for ScoringError {
    fn from(err: envy::Error) -> Self {
        ScoringError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_kind_mapping() {
        assert_eq!(
            ScoringError::NotFound("job".into()).kind(),
            ApiErrorKind::NotFound
        );
        assert_eq!(
            ScoringError::Validation("weights".into()).kind(),
            ApiErrorKind::InvalidInput
        );
        assert_eq!(
            ScoringError::ComputationTimeout(200).kind(),
            ApiErrorKind::Timeout
        );
        assert_eq!(
            ScoringError::Redis("down".into()).kind(),
            ApiErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable_flags() {
        assert!(ScoringError::ComputationTimeout(10).is_retryable());
        assert!(ScoringError::DataUnavailable("user".into()).is_retryable());
        assert!(!ScoringError::NotFound("user".into()).is_retryable());
        assert!(!ScoringError::Validation("sum".into()).is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: ScoringError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ScoringError::NotFound(_)));
    }
}
