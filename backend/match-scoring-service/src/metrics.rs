// ============================================================================
// PROMETHEUS METRICS
// ============================================================================

use crate::error::{Result, ScoringError};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref SCORE_CACHE_HIT: IntCounter = register_int_counter!(
        "match_score_cache_hit_total",
        "Score lookups served from the in-process cache"
    )
    .expect("Failed to register match_score_cache_hit_total");

    pub static ref SCORE_CACHE_MISS: IntCounter = register_int_counter!(
        "match_score_cache_miss_total",
        "Score lookups that triggered a computation"
    )
    .expect("Failed to register match_score_cache_miss_total");

    /// Callers that waited on another caller's in-flight computation
    pub static ref SCORE_CACHE_COALESCED: IntCounter = register_int_counter!(
        "match_score_cache_coalesced_total",
        "Score lookups coalesced onto an in-flight computation"
    )
    .expect("Failed to register match_score_cache_coalesced_total");

    pub static ref SCORE_CACHE_EVICTION: IntCounter = register_int_counter!(
        "match_score_cache_eviction_total",
        "Score cache entries evicted for TTL, staleness or capacity"
    )
    .expect("Failed to register match_score_cache_eviction_total");

    pub static ref SCORE_CACHE_INVALIDATION: IntCounter = register_int_counter!(
        "match_score_cache_invalidation_total",
        "Score cache entries removed by invalidation hooks"
    )
    .expect("Failed to register match_score_cache_invalidation_total");

    /// Batch item outcomes, labelled completed / failed / retried / cancelled
    pub static ref BATCH_ITEMS: IntCounterVec = register_int_counter_vec!(
        "match_batch_items_total",
        "Batch scoring items by outcome",
        &["outcome"]
    )
    .expect("Failed to register match_batch_items_total");

    pub static ref BATCH_RUNS: IntCounterVec = register_int_counter_vec!(
        "match_batch_runs_total",
        "Batch runs by terminal status",
        &["status"]
    )
    .expect("Failed to register match_batch_runs_total");

    pub static ref USER_SCORING_SECONDS: Histogram = register_histogram!(
        "match_user_scoring_seconds",
        "Wall time to score one user's candidate set",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register match_user_scoring_seconds");
}

/// Prometheus text exposition of every registered metric
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ScoringError::Internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ScoringError::Internal(format!("metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        SCORE_CACHE_HIT.inc();
        BATCH_ITEMS.with_label_values(&["completed"]).inc();
        let text = render().unwrap();
        assert!(text.contains("match_score_cache_hit_total"));
        assert!(text.contains("match_batch_items_total"));
    }
}
