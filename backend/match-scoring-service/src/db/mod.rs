//! Data access layer
//!
//! Each upstream concern sits behind its own trait so the scoring core can
//! be driven by PostgreSQL/Redis in production and by [`InMemoryStore`] in
//! tests. Errors are reported as `ScoringError::DataUnavailable` when the
//! backing store cannot be reached and `ScoringError::NotFound` when a
//! single requested record does not exist.

use crate::error::Result;
use crate::models::{
    BatchRun, Job, ReferenceData, ScoreResult, ScoreWeightsConfig, UserAction, UserProfile,
    WeightsVersion,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use postgres::PgRepository;
pub use redis_store::RedisResultStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, job_id: Uuid) -> Result<Job>;

    /// Current freshness token of a job, without loading the row
    async fn get_job_revision(&self, job_id: Uuid) -> Result<i64>;

    /// Bulk read; ids without a readable record are left out of the result
    async fn get_jobs(&self, job_ids: &[Uuid]) -> Result<Vec<Job>>;

    /// Open jobs in the catalog, newest first
    async fn list_job_ids(&self, limit: usize) -> Result<Vec<Uuid>>;

    /// Open jobs worth scoring for a user, newest first
    async fn list_candidate_jobs(&self, user_id: Uuid, limit: usize) -> Result<Vec<Job>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<UserProfile>;

    async fn get_user_revision(&self, user_id: Uuid) -> Result<i64>;

    async fn list_active_user_ids(&self, limit: usize) -> Result<Vec<Uuid>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn get_user_actions(&self, user_id: Uuid, since: DateTime<Utc>)
        -> Result<Vec<UserAction>>;

    /// Actions by any user on the given jobs, most recent first
    async fn get_actions_on_jobs(
        &self,
        job_ids: &[Uuid],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserAction>>;

    async fn get_actions_for_users(
        &self,
        user_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<UserAction>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    async fn get_reference_data(&self) -> Result<ReferenceData>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeightsRepository: Send + Sync {
    async fn get_weights(&self, name: &str, version: u32) -> Result<ScoreWeightsConfig>;

    async fn get_active_weights(&self, name: &str) -> Result<ScoreWeightsConfig>;
}

/// Durable home of score results and batch run records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_score_results(&self, results: &[ScoreResult]) -> Result<()>;

    async fn get_score_results(
        &self,
        user_id: Uuid,
        weights_version: &WeightsVersion,
    ) -> Result<Vec<ScoreResult>>;

    async fn save_batch_run(&self, run: &BatchRun) -> Result<()>;

    async fn get_batch_run(&self, run_id: Uuid) -> Result<Option<BatchRun>>;
}

/// Handles to every upstream the engine reads from or writes to
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub users: Arc<dyn UserRepository>,
    pub actions: Arc<dyn ActionRepository>,
    pub reference: Arc<dyn ReferenceRepository>,
    pub weights: Arc<dyn WeightsRepository>,
    pub results: Arc<dyn ResultStore>,
}

impl Repositories {
    /// Serve every concern from one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: JobRepository
            + UserRepository
            + ActionRepository
            + ReferenceRepository
            + WeightsRepository
            + ResultStore
            + 'static,
    {
        Self {
            jobs: store.clone(),
            users: store.clone(),
            actions: store.clone(),
            reference: store.clone(),
            weights: store.clone(),
            results: store,
        }
    }

    /// PostgreSQL for catalog data, Redis for results and run records
    pub fn from_parts(pg: Arc<PgRepository>, results: Arc<RedisResultStore>) -> Self {
        Self {
            jobs: pg.clone(),
            users: pg.clone(),
            actions: pg.clone(),
            reference: pg.clone(),
            weights: pg,
            results,
        }
    }
}
