/// PostgreSQL-backed repositories
///
/// Jobs, user profiles, actions, reference data and weights configs live in
/// the matching database. Weights configs are stored as JSONB documents keyed
/// by (name, version) with a single active row per name.
use super::{
    ActionRepository, JobRepository, ReferenceRepository, UserRepository, WeightsRepository,
};
use crate::config::DatabaseConfig;
use crate::error::{Result, ScoringError};
use crate::models::{
    ActionType, ActivitySummary, Job, PrefCode, ReferenceData, Salary, SalaryType,
    ScoreWeightsConfig, UserAction, UserPreferences, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pref_code: Option<i16>,
    category_codes: Vec<String>,
    salary_amount: Option<f64>,
    salary_type: Option<String>,
    fee: Option<i64>,
    feature_flags: Vec<String>,
    posted_at: DateTime<Utc>,
    view_count: i64,
    apply_count: i64,
    revision: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let salary = match (row.salary_amount, row.salary_type.as_deref()) {
            (Some(amount), Some(raw)) => match raw.parse::<SalaryType>() {
                Ok(salary_type) => Some(Salary {
                    amount,
                    salary_type,
                }),
                Err(e) => {
                    warn!(job_id = %row.id, "Ignoring salary: {}", e);
                    None
                }
            },
            _ => None,
        };

        Job {
            id: row.id,
            location: to_pref_code(row.pref_code),
            categories: row.category_codes,
            salary,
            fee: row.fee,
            features: row.feature_flags,
            posted_at: row.posted_at,
            view_count: row.view_count.max(0) as u64,
            apply_count: row.apply_count.max(0) as u64,
            revision: row.revision,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    estimated_pref: Option<i16>,
    salary_floor: Option<f64>,
    desired_categories: Vec<String>,
    desired_prefs: Vec<i16>,
    actions_30d: i32,
    last_active_at: Option<DateTime<Utc>>,
    revision: i64,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            id: row.id,
            estimated_location: to_pref_code(row.estimated_pref),
            preferences: UserPreferences {
                salary_floor: row.salary_floor,
                desired_categories: row.desired_categories,
                desired_locations: row
                    .desired_prefs
                    .into_iter()
                    .filter_map(|p| to_pref_code(Some(p)))
                    .collect(),
            },
            activity: ActivitySummary {
                actions_30d: row.actions_30d.max(0) as u32,
                last_active_at: row.last_active_at,
            },
            revision: row.revision,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActionRow {
    user_id: Uuid,
    job_id: Uuid,
    action: String,
    occurred_at: DateTime<Utc>,
}

fn to_pref_code(raw: Option<i16>) -> Option<PrefCode> {
    raw.and_then(|p| PrefCode::try_from(p).ok())
}

/// Unknown action types are skipped rather than failing the whole read
fn into_actions(rows: Vec<ActionRow>) -> Vec<UserAction> {
    rows.into_iter()
        .filter_map(|row| match row.action.parse::<ActionType>() {
            Ok(action) => Some(UserAction {
                user_id: row.user_id,
                job_id: row.job_id,
                action,
                occurred_at: row.occurred_at,
            }),
            Err(e) => {
                warn!(user_id = %row.user_id, "Skipping action: {}", e);
                None
            }
        })
        .collect()
}

const JOB_COLUMNS: &str = "id, pref_code, category_codes, salary_amount, salary_type, fee, \
     feature_flags, posted_at, view_count, apply_count, revision";

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                ScoringError::DataUnavailable(format!("database connection failed: {}", e))
            })?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl JobRepository for PgRepository {
    async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::from)
            .ok_or_else(|| ScoringError::NotFound(format!("job {}", job_id)))
    }

    async fn get_job_revision(&self, job_id: Uuid) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT revision FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScoringError::NotFound(format!("job {}", job_id)))
    }

    async fn get_jobs(&self, job_ids: &[Uuid]) -> Result<Vec<Job>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ANY($1)",
            JOB_COLUMNS
        ))
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn list_job_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM jobs
            WHERE status = 'open'
            ORDER BY posted_at DESC, id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_candidate_jobs(&self, user_id: Uuid, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM jobs j
            WHERE j.status = 'open'
              AND NOT EXISTS (
                SELECT 1 FROM user_actions a
                WHERE a.user_id = $1 AND a.job_id = j.id AND a.action = 'apply'
              )
            ORDER BY j.posted_at DESC, j.id
            LIMIT $2
            "#,
            JOB_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn get_user(&self, user_id: Uuid) -> Result<UserProfile> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, estimated_pref, salary_floor, desired_categories, desired_prefs,
                   actions_30d, last_active_at, revision
            FROM user_profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserProfile::from)
            .ok_or_else(|| ScoringError::NotFound(format!("user {}", user_id)))
    }

    async fn get_user_revision(&self, user_id: Uuid) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT revision FROM user_profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScoringError::NotFound(format!("user {}", user_id)))
    }

    async fn list_active_user_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM user_profiles
            WHERE last_active_at >= NOW() - INTERVAL '30 days'
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ActionRepository for PgRepository {
    async fn get_user_actions(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserAction>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT user_id, job_id, action, occurred_at
            FROM user_actions
            WHERE user_id = $1 AND occurred_at >= $2
            ORDER BY occurred_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_actions(rows))
    }

    async fn get_actions_on_jobs(
        &self,
        job_ids: &[Uuid],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserAction>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT user_id, job_id, action, occurred_at
            FROM user_actions
            WHERE job_id = ANY($1) AND occurred_at >= $2
            ORDER BY occurred_at DESC
            LIMIT $3
            "#,
        )
        .bind(job_ids)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_actions(rows))
    }

    async fn get_actions_for_users(
        &self,
        user_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<UserAction>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT user_id, job_id, action, occurred_at
            FROM user_actions
            WHERE user_id = ANY($1) AND occurred_at >= $2
            "#,
        )
        .bind(user_ids)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_actions(rows))
    }
}

#[async_trait]
impl ReferenceRepository for PgRepository {
    async fn get_reference_data(&self) -> Result<ReferenceData> {
        let adjacency = sqlx::query_as::<_, (i16, i16)>(
            "SELECT pref_code, neighbor_code FROM prefecture_adjacency",
        )
        .fetch_all(&self.pool)
        .await?;
        let regions =
            sqlx::query_as::<_, (i16, i16)>("SELECT pref_code, region_code FROM prefectures")
                .fetch_all(&self.pool)
                .await?;
        let parents = sqlx::query_as::<_, (String, String)>(
            "SELECT code, parent_code FROM job_categories WHERE parent_code IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut reference = ReferenceData::default();
        for (pref, neighbor) in adjacency {
            if let (Some(pref), Some(neighbor)) =
                (to_pref_code(Some(pref)), to_pref_code(Some(neighbor)))
            {
                reference.adjacency.entry(pref).or_default().insert(neighbor);
            }
        }
        for (pref, region) in regions {
            if let (Some(pref), Ok(region)) = (to_pref_code(Some(pref)), u16::try_from(region)) {
                reference.regions.insert(pref, region);
            }
        }
        reference.category_parents.extend(parents);
        Ok(reference)
    }
}

#[async_trait]
impl WeightsRepository for PgRepository {
    async fn get_weights(&self, name: &str, version: u32) -> Result<ScoreWeightsConfig> {
        let row = sqlx::query_scalar::<_, Json<ScoreWeightsConfig>>(
            "SELECT config FROM score_weights_configs WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version as i32)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|Json(config)| config)
            .ok_or_else(|| ScoringError::NotFound(format!("weights {}@v{}", name, version)))
    }

    async fn get_active_weights(&self, name: &str) -> Result<ScoreWeightsConfig> {
        let row = sqlx::query_scalar::<_, Json<ScoreWeightsConfig>>(
            r#"
            SELECT config FROM score_weights_configs
            WHERE name = $1 AND is_active
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|Json(config)| config)
            .ok_or_else(|| ScoringError::NotFound(format!("no active weights for {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_row_with_unknown_salary_type() {
        let row = JobRow {
            id: Uuid::new_v4(),
            pref_code: Some(13),
            category_codes: vec!["logistics".into()],
            salary_amount: Some(1300.0),
            salary_type: Some("weekly".into()),
            fee: Some(3000),
            feature_flags: vec![],
            posted_at: Utc::now(),
            view_count: -1,
            apply_count: 4,
            revision: 2,
        };
        let job = Job::from(row);
        assert!(job.salary.is_none());
        assert_eq!(job.location, Some(13));
        assert_eq!(job.view_count, 0);
        assert_eq!(job.apply_count, 4);
    }

    #[test]
    fn test_invalid_pref_codes_dropped() {
        assert_eq!(to_pref_code(Some(-4)), None);
        assert_eq!(to_pref_code(Some(47)), Some(47));
    }

    #[test]
    fn test_unknown_actions_skipped() {
        let user_id = Uuid::new_v4();
        let rows = vec![
            ActionRow {
                user_id,
                job_id: Uuid::new_v4(),
                action: "apply".into(),
                occurred_at: Utc::now(),
            },
            ActionRow {
                user_id,
                job_id: Uuid::new_v4(),
                action: "bookmark".into(),
                occurred_at: Utc::now(),
            },
        ];
        let actions = into_actions(rows);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionType::Apply);
    }
}
