use super::weights::WeightsVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Base,
    LocationCategory,
    Personalization,
}

impl ScoreComponent {
    pub const ALL: [ScoreComponent; 3] = [
        ScoreComponent::Base,
        ScoreComponent::LocationCategory,
        ScoreComponent::Personalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponent::Base => "base",
            ScoreComponent::LocationCategory => "location_category",
            ScoreComponent::Personalization => "personalization",
        }
    }
}

/// Per-component sub-scores, each on a 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub base: f64,
    pub location_category: f64,
    pub personalization: f64,
}

impl ComponentScores {
    pub fn get(&self, component: ScoreComponent) -> f64 {
        match component {
            ScoreComponent::Base => self.base,
            ScoreComponent::LocationCategory => self.location_category,
            ScoreComponent::Personalization => self.personalization,
        }
    }
}

/// Intermediate signals behind the sub-scores
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub fee_points: f64,
    pub salary_points: f64,
    pub feature_points: f64,
    /// Fraction of base inputs (fee, salary) that were present
    pub base_inputs_present: f64,
    pub location_score: f64,
    pub category_score: f64,
    pub location_known: bool,
    pub category_known: bool,
    pub affinity: f64,
    pub collaborative_boost: f64,
    pub neighbor_count: usize,
    pub action_sample_size: usize,
    pub cold_start: bool,
}

/// Immutable outcome of scoring one (user, job) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub overall_score: f64,
    pub components: ComponentScores,
    pub breakdown: ScoreBreakdown,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
    pub weights_version: WeightsVersion,
    pub computed_at: DateTime<Utc>,
}

impl ScoreResult {
    /// Equality ignoring `computed_at`
    pub fn same_outcome(&self, other: &ScoreResult) -> bool {
        self.user_id == other.user_id
            && self.job_id == other.job_id
            && self.overall_score == other.overall_score
            && self.components == other.components
            && self.breakdown == other.breakdown
            && self.confidence == other.confidence
            && self.reasons == other.reasons
            && self.recommendations == other.recommendations
            && self.weights_version == other.weights_version
    }
}
