use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

pub mod batch;
pub mod score;
pub mod weights;

pub use batch::{
    BatchMode, BatchProgress, BatchRun, BatchStatus, BatchStatusReport, ErrorSummary,
    ItemErrorSample,
};
pub use score::{ComponentScores, ScoreBreakdown, ScoreComponent, ScoreResult};
pub use weights::{
    BaseScoreTiers, ComponentWeights, GeoCategoryParams, PersonalizationParams, SalaryTiers,
    ScoreWeightsConfig, SimilarityMetric, Tier, WeightsVersion,
};

/// Prefecture code (1-47), the smallest location unit the engine compares
pub type PrefCode = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryType {
    Hourly,
    Daily,
    Monthly,
}

impl SalaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryType::Hourly => "hourly",
            SalaryType::Daily => "daily",
            SalaryType::Monthly => "monthly",
        }
    }
}

impl FromStr for SalaryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(SalaryType::Hourly),
            "daily" | "day" => Ok(SalaryType::Daily),
            "monthly" | "month" => Ok(SalaryType::Monthly),
            other => Err(format!("unknown salary type: {}", other)),
        }
    }
}

impl std::fmt::Display for SalaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Salary {
    pub amount: f64,
    pub salary_type: SalaryType,
}

/// A job posting as read from the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub location: Option<PrefCode>,
    pub categories: Vec<String>,
    pub salary: Option<Salary>,
    pub fee: Option<i64>,
    pub features: Vec<String>,
    pub posted_at: DateTime<Utc>,
    pub view_count: u64,
    pub apply_count: u64,
    /// Freshness token, bumped on every upstream update
    pub revision: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub salary_floor: Option<f64>,
    pub desired_categories: Vec<String>,
    pub desired_locations: Vec<PrefCode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub actions_30d: u32,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub estimated_location: Option<PrefCode>,
    pub preferences: UserPreferences,
    pub activity: ActivitySummary,
    pub revision: i64,
}

impl UserProfile {
    /// Locations to compare against a job, stated preferences first
    pub fn candidate_locations(&self) -> Vec<PrefCode> {
        let mut locations = self.preferences.desired_locations.clone();
        if let Some(estimated) = self.estimated_location {
            if !locations.contains(&estimated) {
                locations.push(estimated);
            }
        }
        locations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    View,
    Click,
    Apply,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::View => "view",
            ActionType::Click => "click",
            ActionType::Apply => "apply",
        }
    }

    /// Click and apply express intent, views alone do not
    pub fn is_positive(&self) -> bool {
        matches!(self, ActionType::Click | ActionType::Apply)
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(ActionType::View),
            "click" => Ok(ActionType::Click),
            "apply" | "application" => Ok(ActionType::Apply),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAction {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub action: ActionType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRelation {
    Same,
    Adjacent,
    SameRegion,
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRelation {
    Exact,
    SharedParent,
    Unrelated,
}

/// Location and category hierarchies (master data)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceData {
    /// Prefecture -> bordering prefectures
    pub adjacency: HashMap<PrefCode, HashSet<PrefCode>>,
    /// Prefecture -> region block (e.g. Kanto, Kansai)
    pub regions: HashMap<PrefCode, u16>,
    /// Category -> parent (major) category
    pub category_parents: HashMap<String, String>,
}

impl ReferenceData {
    pub fn location_relation(&self, a: PrefCode, b: PrefCode) -> LocationRelation {
        if a == b {
            return LocationRelation::Same;
        }

        let adjacent = self.adjacency.get(&a).is_some_and(|s| s.contains(&b))
            || self.adjacency.get(&b).is_some_and(|s| s.contains(&a));
        if adjacent {
            return LocationRelation::Adjacent;
        }

        match (self.regions.get(&a), self.regions.get(&b)) {
            (Some(ra), Some(rb)) if ra == rb => LocationRelation::SameRegion,
            _ => LocationRelation::Unrelated,
        }
    }

    /// Parent category, or the category itself when it is a major category
    pub fn major_category<'a>(&'a self, category: &'a str) -> &'a str {
        self.category_parents
            .get(category)
            .map(|p| p.as_str())
            .unwrap_or(category)
    }

    pub fn category_relation(&self, a: &str, b: &str) -> CategoryRelation {
        if a == b {
            CategoryRelation::Exact
        } else if self.major_category(a) == self.major_category(b) {
            CategoryRelation::SharedParent
        } else {
            CategoryRelation::Unrelated
        }
    }
}
