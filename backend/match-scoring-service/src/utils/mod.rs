// Utility functions for match-scoring-service

use crate::models::SimilarityMetric;
use std::collections::HashSet;
use std::hash::Hash;

/// Clamp a score into [0, 100], mapping NaN to 0
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Normalize a value to [0, 1] against a peak; 0 when the peak is empty
pub fn normalize_to_peak(value: f64, peak: f64) -> f64 {
    if peak <= f64::EPSILON {
        0.0
    } else {
        (value / peak).clamp(0.0, 1.0)
    }
}

/// Half-life decay: 1.0 at age 0, 0.5 after one half-life
pub fn half_life_decay(age_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_hours.max(0.0) / half_life_hours)
}

/// Similarity between two sets under the configured metric
pub fn set_similarity<T: Eq + Hash>(
    a: &HashSet<T>,
    b: &HashSet<T>,
    metric: SimilarityMetric,
) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count() as f64;
    match metric {
        SimilarityMetric::Jaccard => {
            let union = (a.len() + b.len()) as f64 - intersection;
            intersection / union
        }
        SimilarityMetric::Cosine => intersection / ((a.len() * b.len()) as f64).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(120.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn test_normalize_to_peak() {
        assert!((normalize_to_peak(5.0, 10.0) - 0.5).abs() < 1e-9);
        assert_eq!(normalize_to_peak(10.0, 10.0), 1.0);
        assert_eq!(normalize_to_peak(3.0, 0.0), 0.0);
    }

    #[test]
    fn test_half_life_decay() {
        // 半衰期後應該約為 0.5
        assert!((half_life_decay(168.0, 168.0) - 0.5).abs() < 1e-9);
        assert!((half_life_decay(0.0, 168.0) - 1.0).abs() < 1e-9);
        assert!((half_life_decay(336.0, 168.0) - 0.25).abs() < 1e-9);
        // Future timestamps do not amplify
        assert_eq!(half_life_decay(-5.0, 24.0), 1.0);
    }

    #[test]
    fn test_set_similarity() {
        let a: HashSet<u32> = [1, 2, 3, 4].into_iter().collect();
        let b: HashSet<u32> = [3, 4, 5, 6].into_iter().collect();
        let empty: HashSet<u32> = HashSet::new();

        assert!((set_similarity(&a, &b, SimilarityMetric::Jaccard) - 2.0 / 6.0).abs() < 1e-9);
        assert!((set_similarity(&a, &b, SimilarityMetric::Cosine) - 0.5).abs() < 1e-9);
        assert_eq!(set_similarity(&a, &empty, SimilarityMetric::Jaccard), 0.0);
        assert!((set_similarity(&a, &a, SimilarityMetric::Jaccard) - 1.0).abs() < 1e-9);
    }
}
