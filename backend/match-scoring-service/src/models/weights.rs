use crate::error::{Result, ScoringError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tolerance for "weights sum to 1.0"
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Ceiling of the fee part of the base score
pub const MAX_FEE_POINTS: f64 = 50.0;
/// Ceiling of the salary part of the base score
pub const MAX_SALARY_POINTS: f64 = 30.0;
/// Documented ceiling of the whole base score
pub const MAX_BASE_POINTS: f64 = MAX_FEE_POINTS + MAX_SALARY_POINTS;

/// Identity of a published weights snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeightsVersion {
    pub name: String,
    pub version: u32,
}

impl WeightsVersion {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for WeightsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub base: f64,
    pub location_category: f64,
    pub personalization: f64,
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.base + self.location_category + self.personalization
    }
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            base: 0.4,
            location_category: 0.3,
            personalization: 0.3,
        }
    }
}

/// One step of a tier table: values `>= threshold` earn `points`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold: f64,
    pub points: f64,
}

impl Tier {
    pub const fn new(threshold: f64, points: f64) -> Self {
        Self { threshold, points }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryTiers {
    pub hourly: Vec<Tier>,
    pub daily: Vec<Tier>,
    pub monthly: Vec<Tier>,
}

impl Default for SalaryTiers {
    fn default() -> Self {
        // Daily and monthly anchors follow the hourly ones at 8h/day, 160h/month
        Self {
            hourly: vec![Tier::new(1200.0, 20.0), Tier::new(1500.0, 30.0)],
            daily: vec![Tier::new(9600.0, 20.0), Tier::new(12000.0, 30.0)],
            monthly: vec![Tier::new(192_000.0, 20.0), Tier::new(240_000.0, 30.0)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseScoreTiers {
    /// Ascending fee anchors; below the first anchor earns nothing
    pub fee: Vec<Tier>,
    pub salary: SalaryTiers,
    /// Optional bonus per job feature flag
    #[serde(default)]
    pub feature_bonus: HashMap<String, f64>,
}

impl Default for BaseScoreTiers {
    fn default() -> Self {
        Self {
            fee: vec![
                Tier::new(500.0, 10.0),
                Tier::new(2750.0, 30.0),
                Tier::new(5000.0, 50.0),
            ],
            salary: SalaryTiers::default(),
            feature_bonus: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCategoryParams {
    pub location_weight: f64,
    pub category_weight: f64,
    pub same_location: f64,
    pub adjacent_location: f64,
    /// Intermediate tier for prefectures in the same region block
    pub same_region: f64,
    pub exact_category: f64,
    pub shared_parent_category: f64,
}

impl Default for GeoCategoryParams {
    fn default() -> Self {
        Self {
            location_weight: 0.5,
            category_weight: 0.5,
            same_location: 100.0,
            adjacent_location: 60.0,
            same_region: 30.0,
            exact_category: 100.0,
            shared_parent_category: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// |A ∩ B| / |A ∪ B| over acted-on job sets
    Jaccard,
    /// |A ∩ B| / sqrt(|A| * |B|)
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalizationParams {
    pub half_life_hours: f64,
    pub lookback_days: i64,
    pub view_weight: f64,
    pub click_weight: f64,
    pub apply_weight: f64,
    pub affinity_weight: f64,
    pub cf_weight: f64,
    pub similarity: SimilarityMetric,
    pub top_k: usize,
    pub min_similarity: f64,
    pub max_candidate_neighbors: usize,
    pub cold_start_score: f64,
    /// Action count at which the sample-size factor saturates
    pub full_confidence_actions: u32,
    /// Share of confidence driven by sample size
    pub sample_weight: f64,
}

impl Default for PersonalizationParams {
    fn default() -> Self {
        Self {
            half_life_hours: 168.0,
            lookback_days: 90,
            view_weight: 1.0,
            click_weight: 2.0,
            apply_weight: 5.0,
            affinity_weight: 0.7,
            cf_weight: 0.3,
            similarity: SimilarityMetric::Jaccard,
            top_k: 20,
            min_similarity: 0.05,
            max_candidate_neighbors: 500,
            cold_start_score: 50.0,
            full_confidence_actions: 20,
            sample_weight: 0.4,
        }
    }
}

/// Named, versioned scoring configuration. Never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeightsConfig {
    pub name: String,
    pub version: u32,
    pub weights: ComponentWeights,
    pub base: BaseScoreTiers,
    pub geo: GeoCategoryParams,
    pub personalization: PersonalizationParams,
    pub published_at: DateTime<Utc>,
}

impl ScoreWeightsConfig {
    /// Config with the documented anchor tiers and the given weights
    pub fn new(name: impl Into<String>, version: u32, weights: ComponentWeights) -> Self {
        Self {
            name: name.into(),
            version,
            weights,
            base: BaseScoreTiers::default(),
            geo: GeoCategoryParams::default(),
            personalization: PersonalizationParams::default(),
            published_at: Utc::now(),
        }
    }

    pub fn version_id(&self) -> WeightsVersion {
        WeightsVersion::new(self.name.clone(), self.version)
    }

    /// Reject malformed configs before any scoring happens
    pub fn validate(&self) -> Result<()> {
        let id = self.version_id();

        if self.name.trim().is_empty() {
            return Err(ScoringError::Validation("weights name is empty".into()));
        }

        let w = &self.weights;
        for (label, value) in [
            ("base", w.base),
            ("location_category", w.location_category),
            ("personalization", w.personalization),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ScoringError::Validation(format!(
                    "{}: weight {} = {} outside [0, 1]",
                    id, label, value
                )));
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(ScoringError::Validation(format!(
                "{}: component weights sum to {:.6}, expected 1.0",
                id,
                w.sum()
            )));
        }

        validate_tiers(&id, "fee", &self.base.fee, MAX_FEE_POINTS)?;
        validate_tiers(&id, "salary.hourly", &self.base.salary.hourly, MAX_SALARY_POINTS)?;
        validate_tiers(&id, "salary.daily", &self.base.salary.daily, MAX_SALARY_POINTS)?;
        validate_tiers(&id, "salary.monthly", &self.base.salary.monthly, MAX_SALARY_POINTS)?;
        if let Some((flag, bonus)) = self
            .base
            .feature_bonus
            .iter()
            .find(|(_, b)| !b.is_finite() || **b < 0.0)
        {
            return Err(ScoringError::Validation(format!(
                "{}: feature bonus {} = {} must be non-negative",
                id, flag, bonus
            )));
        }

        let geo = &self.geo;
        if (geo.location_weight + geo.category_weight - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(ScoringError::Validation(format!(
                "{}: geo location/category weights must sum to 1.0",
                id
            )));
        }
        let geo_tiers = [
            geo.same_location,
            geo.adjacent_location,
            geo.same_region,
            geo.exact_category,
            geo.shared_parent_category,
        ];
        if geo_tiers.iter().any(|t| !(0.0..=100.0).contains(t)) {
            return Err(ScoringError::Validation(format!(
                "{}: geo tier values must be within [0, 100]",
                id
            )));
        }
        if !(geo.same_location >= geo.adjacent_location && geo.adjacent_location >= geo.same_region)
        {
            return Err(ScoringError::Validation(format!(
                "{}: location tiers must decrease same >= adjacent >= region",
                id
            )));
        }

        let p = &self.personalization;
        if p.half_life_hours <= 0.0 || p.lookback_days <= 0 {
            return Err(ScoringError::Validation(format!(
                "{}: half_life_hours and lookback_days must be positive",
                id
            )));
        }
        if (p.affinity_weight + p.cf_weight - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(ScoringError::Validation(format!(
                "{}: affinity_weight + cf_weight must sum to 1.0",
                id
            )));
        }
        if p.top_k == 0 || p.full_confidence_actions == 0 {
            return Err(ScoringError::Validation(format!(
                "{}: top_k and full_confidence_actions must be positive",
                id
            )));
        }
        if !(0.0..=100.0).contains(&p.cold_start_score) || !(0.0..=1.0).contains(&p.sample_weight)
        {
            return Err(ScoringError::Validation(format!(
                "{}: cold_start_score or sample_weight out of range",
                id
            )));
        }

        Ok(())
    }
}

fn validate_tiers(id: &WeightsVersion, label: &str, tiers: &[Tier], max_points: f64) -> Result<()> {
    if tiers.is_empty() {
        return Err(ScoringError::Validation(format!(
            "{}: missing required {} tiers",
            id, label
        )));
    }

    for pair in tiers.windows(2) {
        if pair[1].threshold <= pair[0].threshold || pair[1].points < pair[0].points {
            return Err(ScoringError::Validation(format!(
                "{}: {} tiers must have ascending thresholds and non-decreasing points",
                id, label
            )));
        }
    }

    if tiers
        .iter()
        .any(|t| t.threshold <= 0.0 || t.points < 0.0 || t.points > max_points)
    {
        return Err(ScoringError::Validation(format!(
            "{}: {} tier points must be within [0, {}] with positive thresholds",
            id, label, max_points
        )));
    }

    Ok(())
}
