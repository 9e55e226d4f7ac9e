//! In-process store backing every repository trait
//!
//! Used by tests and by local runs without PostgreSQL/Redis. Supports
//! failure injection (unavailable records, slow reads, a global outage)
//! and counts reads so callers can assert on caching behaviour.

use super::{
    ActionRepository, JobRepository, ReferenceRepository, ResultStore, UserRepository,
    WeightsRepository,
};
use crate::error::{Result, ScoringError};
use crate::models::{
    ActionType, BatchRun, Job, ReferenceData, ScoreResult, ScoreWeightsConfig, UserAction,
    UserProfile, WeightsVersion,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

/// Remaining injected failures for one record
#[derive(Debug, Clone, Copy)]
enum Injected {
    /// Fail the next `n` reads, then recover
    Fail(u32),
    Always,
}

#[derive(Debug, Default)]
pub struct ReadCounters {
    pub job_reads: AtomicU64,
    pub user_reads: AtomicU64,
    pub revision_reads: AtomicU64,
    pub action_reads: AtomicU64,
    pub result_writes: AtomicU64,
}

#[derive(Default)]
pub struct InMemoryStore {
    jobs: DashMap<Uuid, Job>,
    users: DashMap<Uuid, UserProfile>,
    actions: DashMap<Uuid, Vec<UserAction>>,
    reference: RwLock<ReferenceData>,
    weights: DashMap<(String, u32), ScoreWeightsConfig>,
    active_weights: DashMap<String, u32>,
    results: DashMap<(Uuid, WeightsVersion), HashMap<Uuid, ScoreResult>>,
    batch_runs: DashMap<Uuid, BatchRun>,

    job_failures: DashMap<Uuid, Injected>,
    user_failures: DashMap<Uuid, Injected>,
    job_delays: DashMap<Uuid, Duration>,
    unavailable: AtomicBool,
    pub counters: ReadCounters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_job(&self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn insert_user(&self, user: UserProfile) {
        self.users.insert(user.id, user);
    }

    pub fn record_action(&self, user_id: Uuid, job_id: Uuid, action: ActionType, at: DateTime<Utc>) {
        self.actions.entry(user_id).or_default().push(UserAction {
            user_id,
            job_id,
            action,
            occurred_at: at,
        });
    }

    pub fn set_reference_data(&self, reference: ReferenceData) {
        *self
            .reference
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = reference;
    }

    /// Store a weights config; `activate` makes it the active version of its name
    pub fn put_weights(&self, config: ScoreWeightsConfig, activate: bool) {
        if activate {
            self.active_weights.insert(config.name.clone(), config.version);
        }
        self.weights
            .insert((config.name.clone(), config.version), config);
    }

    /// Fail reads of a job `times` times (`u32::MAX` = forever)
    pub fn fail_job_reads(&self, job_id: Uuid, times: u32) {
        let injected = if times == u32::MAX {
            Injected::Always
        } else {
            Injected::Fail(times)
        };
        self.job_failures.insert(job_id, injected);
    }

    pub fn fail_user_reads(&self, user_id: Uuid, times: u32) {
        let injected = if times == u32::MAX {
            Injected::Always
        } else {
            Injected::Fail(times)
        };
        self.user_failures.insert(user_id, injected);
    }

    /// Delay single-job reads of `job_id`
    pub fn delay_job_reads(&self, job_id: Uuid, delay: Duration) {
        self.job_delays.insert(job_id, delay);
    }

    /// Simulate a full outage of the store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn batch_run(&self, run_id: Uuid) -> Option<BatchRun> {
        self.batch_runs.get(&run_id).map(|r| r.clone())
    }

    pub fn stored_result_count(&self) -> usize {
        self.results.iter().map(|entry| entry.value().len()).sum()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ScoringError::DataUnavailable("store is unavailable".into()))
        } else {
            Ok(())
        }
    }

    /// Consume one injected failure; true when this read must fail
    fn take_failure(failures: &DashMap<Uuid, Injected>, id: Uuid) -> bool {
        let Some(mut entry) = failures.get_mut(&id) else {
            return false;
        };
        match *entry {
            Injected::Always => true,
            Injected::Fail(0) => false,
            Injected::Fail(n) => {
                *entry = Injected::Fail(n - 1);
                true
            }
        }
    }

    fn has_pending_failure(failures: &DashMap<Uuid, Injected>, id: Uuid) -> bool {
        failures
            .get(&id)
            .is_some_and(|f| !matches!(*f, Injected::Fail(0)))
    }

    fn recent_actions(&self, user_id: Uuid, since: DateTime<Utc>) -> Vec<UserAction> {
        self.actions
            .get(&user_id)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| a.occurred_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.counters.job_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let delay = self.job_delays.get(&job_id).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.job_failures, job_id) {
            return Err(ScoringError::DataUnavailable(format!(
                "job {} could not be read",
                job_id
            )));
        }

        self.jobs
            .get(&job_id)
            .map(|j| j.clone())
            .ok_or_else(|| ScoringError::NotFound(format!("job {}", job_id)))
    }

    async fn get_job_revision(&self, job_id: Uuid) -> Result<i64> {
        self.counters.revision_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.jobs
            .get(&job_id)
            .map(|j| j.revision)
            .ok_or_else(|| ScoringError::NotFound(format!("job {}", job_id)))
    }

    async fn get_jobs(&self, job_ids: &[Uuid]) -> Result<Vec<Job>> {
        self.counters.job_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        // Faulty and slow records are left for single reads to surface
        Ok(job_ids
            .iter()
            .filter(|id| {
                !Self::has_pending_failure(&self.job_failures, **id)
                    && !self.job_delays.contains_key(*id)
            })
            .filter_map(|id| self.jobs.get(id).map(|j| j.clone()))
            .collect())
    }

    async fn list_job_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        self.check_available()?;
        let mut jobs: Vec<(DateTime<Utc>, Uuid)> =
            self.jobs.iter().map(|j| (j.posted_at, j.id)).collect();
        jobs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(jobs.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn list_candidate_jobs(&self, user_id: Uuid, limit: usize) -> Result<Vec<Job>> {
        self.check_available()?;
        let applied: HashSet<Uuid> = self
            .actions
            .get(&user_id)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| a.action == ActionType::Apply)
                    .map(|a| a.job_id)
                    .collect()
            })
            .unwrap_or_default();

        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| !applied.contains(&j.id))
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| b.posted_at.cmp(&a.posted_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<UserProfile> {
        self.counters.user_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        if Self::take_failure(&self.user_failures, user_id) {
            return Err(ScoringError::DataUnavailable(format!(
                "user {} could not be read",
                user_id
            )));
        }
        self.users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or_else(|| ScoringError::NotFound(format!("user {}", user_id)))
    }

    async fn get_user_revision(&self, user_id: Uuid) -> Result<i64> {
        self.counters.revision_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.users
            .get(&user_id)
            .map(|u| u.revision)
            .ok_or_else(|| ScoringError::NotFound(format!("user {}", user_id)))
    }

    async fn list_active_user_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        self.check_available()?;
        let mut ids: Vec<Uuid> = self.users.iter().map(|u| u.id).collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }
}

#[async_trait]
impl ActionRepository for InMemoryStore {
    async fn get_user_actions(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserAction>> {
        self.counters.action_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(self.recent_actions(user_id, since))
    }

    async fn get_actions_on_jobs(
        &self,
        job_ids: &[Uuid],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserAction>> {
        self.counters.action_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        let wanted: HashSet<&Uuid> = job_ids.iter().collect();
        let mut matched: Vec<UserAction> = self
            .actions
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|a| a.occurred_at >= since && wanted.contains(&a.job_id))
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn get_actions_for_users(
        &self,
        user_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<UserAction>> {
        self.counters.action_reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(user_ids
            .iter()
            .flat_map(|id| self.recent_actions(*id, since))
            .collect())
    }
}

#[async_trait]
impl ReferenceRepository for InMemoryStore {
    async fn get_reference_data(&self) -> Result<ReferenceData> {
        self.check_available()?;
        Ok(self
            .reference
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

#[async_trait]
impl WeightsRepository for InMemoryStore {
    async fn get_weights(&self, name: &str, version: u32) -> Result<ScoreWeightsConfig> {
        self.check_available()?;
        self.weights
            .get(&(name.to_string(), version))
            .map(|w| w.clone())
            .ok_or_else(|| ScoringError::NotFound(format!("weights {}@v{}", name, version)))
    }

    async fn get_active_weights(&self, name: &str) -> Result<ScoreWeightsConfig> {
        let version = self
            .active_weights
            .get(name)
            .map(|v| *v)
            .ok_or_else(|| ScoringError::NotFound(format!("no active weights for {}", name)))?;
        self.get_weights(name, version).await
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn save_score_results(&self, results: &[ScoreResult]) -> Result<()> {
        self.check_available()?;
        for result in results {
            self.counters.result_writes.fetch_add(1, Ordering::Relaxed);
            self.results
                .entry((result.user_id, result.weights_version.clone()))
                .or_default()
                .insert(result.job_id, result.clone());
        }
        Ok(())
    }

    async fn get_score_results(
        &self,
        user_id: Uuid,
        weights_version: &WeightsVersion,
    ) -> Result<Vec<ScoreResult>> {
        self.check_available()?;
        Ok(self
            .results
            .get(&(user_id, weights_version.clone()))
            .map(|by_job| by_job.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_batch_run(&self, run: &BatchRun) -> Result<()> {
        self.check_available()?;
        self.batch_runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_batch_run(&self, run_id: Uuid) -> Result<Option<BatchRun>> {
        self.check_available()?;
        Ok(self.batch_run(run_id))
    }
}
