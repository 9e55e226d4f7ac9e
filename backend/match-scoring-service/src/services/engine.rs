//! Scoring engine facade
//!
//! Owns the active weights snapshot, reference data, the score cache and a
//! per-user context cache. Synchronous callers go through `compute_score`
//! and `get_ranked_sections`; the batch orchestrator reuses the same
//! context and cache paths so every entry point produces identical results.

use super::cache::{CacheKey, Freshness, ScoreCache};
use super::components::personalization::candidate_neighbor_ids;
use super::components::{select_neighbors, UserHistory};
use super::composite::{CompositeScorer, ScoringInputs};
use super::ranking::{RankedEntry, RankingAssembler, RankingCandidate, SectionConfig};
use crate::config::{CacheConfig, Config, RankingConfig};
use crate::db::Repositories;
use crate::error::{Result, ScoringError};
use crate::models::{
    Job, ReferenceData, ScoreResult, ScoreWeightsConfig, UserProfile, WeightsVersion,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use resilience::with_timeout_result;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Co-action rows scanned per candidate neighbor
const NEIGHBOR_SCAN_FACTOR: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub weights_name: String,
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    pub ranking: RankingConfig,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            weights_name: config.service.weights_name.clone(),
            request_timeout: config.service.request_timeout(),
            cache: config.cache.clone(),
            ranking: config.ranking.clone(),
        }
    }
}

/// Everything about one user that scoring reads, prepared once per
/// weights version and shared across that user's jobs
#[derive(Debug)]
pub struct UserContext {
    pub user: UserProfile,
    pub history: UserHistory,
    pub weights_version: WeightsVersion,
    prepared_at: Instant,
}

type ContextSlot = Arc<OnceCell<Arc<UserContext>>>;

pub struct ScoringEngine {
    repos: Repositories,
    settings: EngineSettings,
    weights: RwLock<Arc<ScoreWeightsConfig>>,
    reference: RwLock<Arc<ReferenceData>>,
    cache: Arc<ScoreCache>,
    contexts: DashMap<(Uuid, WeightsVersion), ContextSlot>,
    assembler: RankingAssembler,
}

impl ScoringEngine {
    /// Load the active weights and reference data, rejecting invalid weights
    pub async fn new(repos: Repositories, settings: EngineSettings) -> Result<Self> {
        let weights = repos
            .weights
            .get_active_weights(&settings.weights_name)
            .await?;
        weights.validate()?;
        let reference = repos.reference.get_reference_data().await?;
        SectionConfig::validate_all(&settings.ranking.sections)?;

        info!(
            weights = %weights.version_id(),
            prefectures = reference.regions.len(),
            categories = reference.category_parents.len(),
            "Scoring engine initialized"
        );

        Ok(Self {
            cache: Arc::new(ScoreCache::new(
                settings.cache.ttl(),
                settings.cache.max_entries,
            )),
            assembler: RankingAssembler::new(settings.ranking.sections.clone()),
            weights: RwLock::new(Arc::new(weights)),
            reference: RwLock::new(Arc::new(reference)),
            contexts: DashMap::new(),
            repos,
            settings,
        })
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<ScoreCache> {
        &self.cache
    }

    pub fn active_weights(&self) -> Arc<ScoreWeightsConfig> {
        self.weights
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reference(&self) -> Arc<ReferenceData> {
        self.reference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The active snapshot, or a specific published version of the same name
    pub async fn resolve_weights(&self, version: Option<u32>) -> Result<Arc<ScoreWeightsConfig>> {
        let active = self.active_weights();
        match version {
            None => Ok(active),
            Some(v) if v == active.version => Ok(active),
            Some(v) => {
                let config = self.repos.weights.get_weights(&active.name, v).await?;
                config.validate()?;
                Ok(Arc::new(config))
            }
        }
    }

    /// Cache-first score of one pair under the active weights
    ///
    /// The current user and job revisions are looked up on every call, so an
    /// upstream update is picked up even when no update hook was called.
    pub async fn compute_score(&self, user_id: Uuid, job_id: Uuid) -> Result<Arc<ScoreResult>> {
        let weights = self.active_weights();
        let key = CacheKey::new(user_id, job_id, weights.version_id());

        self.within_deadline(async {
            let freshness = Freshness {
                user_revision: self.repos.users.get_user_revision(user_id).await?,
                job_revision: self.repos.jobs.get_job_revision(job_id).await?,
            };
            self.cache
                .get_or_compute(&key, Some(freshness), || async {
                    let context = self
                        .context_at(user_id, &weights, Some(freshness.user_revision))
                        .await?;
                    let job = self.repos.jobs.get_job(job_id).await?;
                    Ok(self.evaluate(&context, &job, &weights))
                })
                .await
        })
        .await
    }

    /// Score an already-loaded job for a prepared user, reusing fresh cache entries
    pub async fn score_prepared(
        &self,
        context: &UserContext,
        job: &Job,
        weights: &ScoreWeightsConfig,
    ) -> Result<Arc<ScoreResult>> {
        let key = CacheKey::new(context.user.id, job.id, weights.version_id());
        let freshness = Freshness {
            user_revision: context.user.revision,
            job_revision: job.revision,
        };
        self.cache
            .get_or_compute(&key, Some(freshness), || async {
                Ok(self.evaluate(context, job, weights))
            })
            .await
    }

    /// Score one user against a set of jobs under the given weights
    pub async fn score_user_against(
        &self,
        user_id: Uuid,
        jobs: &[Job],
        weights: &Arc<ScoreWeightsConfig>,
    ) -> Result<Vec<Arc<ScoreResult>>> {
        let context = self.user_context(user_id, weights).await?;
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(self.score_prepared(&context, job, weights).await?);
        }
        Ok(results)
    }

    /// Ordered, sectioned digest of the user's candidate jobs
    pub async fn get_ranked_sections(&self, user_id: Uuid) -> Result<Vec<RankedEntry>> {
        self.within_deadline(async {
            let weights = self.active_weights();
            let mut jobs = self
                .repos
                .jobs
                .list_candidate_jobs(user_id, self.settings.ranking.candidate_limit)
                .await?;

            let present: HashSet<Uuid> = jobs.iter().map(|j| j.id).collect();
            let missing_pins: Vec<Uuid> = self
                .assembler
                .pinned_job_ids()
                .into_iter()
                .filter(|id| !present.contains(id))
                .collect();
            if !missing_pins.is_empty() {
                jobs.extend(self.repos.jobs.get_jobs(&missing_pins).await?);
            }

            let results = self.score_user_against(user_id, &jobs, &weights).await?;
            let posted: HashMap<Uuid, DateTime<Utc>> =
                jobs.iter().map(|j| (j.id, j.posted_at)).collect();
            let candidates: Vec<RankingCandidate> = results
                .into_iter()
                .filter_map(|result| {
                    posted.get(&result.job_id).map(|posted_at| RankingCandidate {
                        posted_at: *posted_at,
                        result,
                    })
                })
                .collect();

            let entries = self.assembler.assemble(candidates);
            debug!(%user_id, entries = entries.len(), "Assembled ranked sections");
            Ok::<_, ScoringError>(entries)
        })
        .await
    }

    /// Validate and activate a newer weights version, dropping results
    /// computed under any other version
    pub async fn publish_weights(&self, config: ScoreWeightsConfig) -> Result<WeightsVersion> {
        config.validate()?;

        let version = config.version_id();
        {
            let mut active = self.weights.write().unwrap_or_else(PoisonError::into_inner);
            if config.name != active.name {
                return Err(ScoringError::Validation(format!(
                    "cannot publish {} over weights family {}",
                    version, active.name
                )));
            }
            if config.version <= active.version {
                return Err(ScoringError::Validation(format!(
                    "{} is not newer than active {}",
                    version,
                    active.version_id()
                )));
            }
            *active = Arc::new(config);
        }

        let evicted = self.cache.retain_version(&version);
        self.contexts.retain(|(_, v), _| v == &version);
        info!(weights = %version, evicted, "Published scoring weights");
        Ok(version)
    }

    /// Pick up a version activated elsewhere; returns it when it changed
    pub async fn reload_active_weights(&self) -> Result<Option<WeightsVersion>> {
        let latest = self
            .repos
            .weights
            .get_active_weights(&self.settings.weights_name)
            .await?;
        if latest.version <= self.active_weights().version {
            return Ok(None);
        }
        self.publish_weights(latest).await.map(Some)
    }

    /// Reload location/category hierarchies; every score depends on them
    pub async fn refresh_reference_data(&self) -> Result<()> {
        let reference = self.repos.reference.get_reference_data().await?;
        *self.reference.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(reference);
        let evicted = self.cache.clear();
        self.contexts.clear();
        info!(evicted, "Reference data refreshed");
        Ok(())
    }

    pub fn on_job_updated(&self, job_id: Uuid) {
        let evicted = self.cache.invalidate_job(job_id);
        debug!(%job_id, evicted, "Job updated");
    }

    pub fn on_user_updated(&self, user_id: Uuid) {
        let evicted = self.cache.invalidate_user(user_id);
        self.contexts.retain(|(u, _), _| *u != user_id);
        debug!(%user_id, evicted, "User updated");
    }

    /// Prepared context for a user, built once per TTL window
    pub async fn user_context(
        &self,
        user_id: Uuid,
        weights: &ScoreWeightsConfig,
    ) -> Result<Arc<UserContext>> {
        self.context_at(user_id, weights, None).await
    }

    /// Like `user_context`, but a context built from another user revision
    /// than `revision` is rebuilt
    async fn context_at(
        &self,
        user_id: Uuid,
        weights: &ScoreWeightsConfig,
        revision: Option<i64>,
    ) -> Result<Arc<UserContext>> {
        let key = (user_id, weights.version_id());
        let ttl = self.settings.cache.user_context_ttl();
        let (slot, inserted) = {
            let mut inserted = false;
            let mut entry = self.contexts.entry(key.clone()).or_insert_with(|| {
                inserted = true;
                Arc::new(OnceCell::new())
            });
            let stale = entry.value().get().is_some_and(|ctx| {
                ctx.prepared_at.elapsed() >= ttl
                    || revision.is_some_and(|r| r != ctx.user.revision)
            });
            if stale {
                *entry.value_mut() = Arc::new(OnceCell::new());
            }
            (entry.value().clone(), inserted)
        };
        if inserted {
            self.prune_contexts();
        }

        match slot
            .get_or_try_init(|| self.build_context(user_id, weights))
            .await
        {
            Ok(context) => Ok(context.clone()),
            Err(e) => {
                self.contexts
                    .remove_if(&key, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                Err(e)
            }
        }
    }

    /// Keep the context map within the cache capacity: expired contexts go
    /// first, then a tenth of the rest
    fn prune_contexts(&self) {
        let capacity = self.settings.cache.max_entries.max(1);
        let len = self.contexts.len();
        if len <= capacity {
            return;
        }

        let ttl = self.settings.cache.user_context_ttl();
        self.contexts.retain(|_, slot| {
            !slot
                .get()
                .is_some_and(|ctx| ctx.prepared_at.elapsed() >= ttl)
        });

        let remaining = self.contexts.len();
        if remaining > capacity {
            let target = capacity - capacity / 10;
            let victims: Vec<(Uuid, WeightsVersion)> = self
                .contexts
                .iter()
                .filter(|e| e.value().initialized())
                .take(remaining - target)
                .map(|e| e.key().clone())
                .collect();
            for key in victims {
                self.contexts.remove(&key);
            }
        }
        debug!(
            before = len,
            after = self.contexts.len(),
            "User context map over capacity, pruned"
        );
    }

    async fn build_context(
        &self,
        user_id: Uuid,
        weights: &ScoreWeightsConfig,
    ) -> Result<Arc<UserContext>> {
        let params = &weights.personalization;
        let now = Utc::now();
        let since = now - chrono::Duration::days(params.lookback_days);

        let user = self.repos.users.get_user(user_id).await?;
        let actions = self.repos.actions.get_user_actions(user_id, since).await?;

        let history = if actions.is_empty() {
            UserHistory::cold(user_id)
        } else {
            let acted: HashSet<Uuid> = actions.iter().map(|a| a.job_id).collect();
            let acted_ids: Vec<Uuid> = acted.iter().copied().collect();
            let acted_jobs: HashMap<Uuid, Job> = self
                .repos
                .jobs
                .get_jobs(&acted_ids)
                .await?
                .into_iter()
                .map(|j| (j.id, j))
                .collect();

            let co_actions = self
                .repos
                .actions
                .get_actions_on_jobs(
                    &acted_ids,
                    since,
                    params.max_candidate_neighbors * NEIGHBOR_SCAN_FACTOR,
                )
                .await?;
            let candidates =
                candidate_neighbor_ids(user_id, &co_actions, params.max_candidate_neighbors);

            let (neighbors, neighbor_actions) = if candidates.is_empty() {
                (Vec::new(), Vec::new())
            } else {
                let candidate_actions = self
                    .repos
                    .actions
                    .get_actions_for_users(&candidates, since)
                    .await?;
                let neighbors = select_neighbors(user_id, &acted, &candidate_actions, params);
                (neighbors, candidate_actions)
            };

            if acted_jobs.len() < acted.len() {
                warn!(
                    %user_id,
                    missing = acted.len() - acted_jobs.len(),
                    "Some acted-on jobs could not be read; affinity uses the rest"
                );
            }

            UserHistory::build(
                user_id,
                &actions,
                &acted_jobs,
                neighbors,
                &neighbor_actions,
                &self.reference(),
                params,
                now,
            )
        };

        debug!(
            %user_id,
            actions = history.action_count,
            neighbors = history.neighbors.len(),
            "Prepared user context"
        );

        Ok(Arc::new(UserContext {
            user,
            history,
            weights_version: weights.version_id(),
            prepared_at: Instant::now(),
        }))
    }

    fn evaluate(
        &self,
        context: &UserContext,
        job: &Job,
        weights: &ScoreWeightsConfig,
    ) -> (ScoreResult, Freshness) {
        let reference = self.reference();
        let inputs = ScoringInputs {
            user: &context.user,
            job,
            history: &context.history,
            reference: &reference,
        };
        let result = CompositeScorer::new(weights).score(&inputs, Utc::now());
        let freshness = Freshness {
            user_revision: context.user.revision,
            job_revision: job.revision,
        };
        (result, freshness)
    }

    async fn within_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        with_timeout_result(self.settings.request_timeout, fut, |elapsed| {
            ScoringError::ComputationTimeout(elapsed.as_millis() as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        MockActionRepository, MockJobRepository, MockReferenceRepository, MockResultStore,
        MockUserRepository, MockWeightsRepository,
    };
    use crate::db::InMemoryStore;
    use crate::error::ApiErrorKind;
    use crate::models::{
        ActivitySummary, ComponentWeights, Salary, SalaryType, UserPreferences,
    };

    fn settings() -> EngineSettings {
        EngineSettings {
            weights_name: "default".into(),
            request_timeout: Duration::from_millis(500),
            cache: CacheConfig::default(),
            ranking: RankingConfig::default(),
        }
    }

    fn repos(users: MockUserRepository, weights: MockWeightsRepository) -> Repositories {
        let mut reference = MockReferenceRepository::new();
        reference
            .expect_get_reference_data()
            .returning(|| Ok(ReferenceData::default()));

        Repositories {
            jobs: Arc::new(MockJobRepository::new()),
            users: Arc::new(users),
            actions: Arc::new(MockActionRepository::new()),
            reference: Arc::new(reference),
            weights: Arc::new(weights),
            results: Arc::new(MockResultStore::new()),
        }
    }

    fn active_weights() -> MockWeightsRepository {
        let mut weights = MockWeightsRepository::new();
        weights.expect_get_active_weights().returning(|name| {
            Ok(ScoreWeightsConfig::new(name, 1, ComponentWeights::default()))
        });
        weights
    }

    #[tokio::test]
    async fn test_unknown_user_maps_to_not_found() {
        let mut users = MockUserRepository::new();
        users
            .expect_get_user_revision()
            .returning(|id| Err(ScoringError::NotFound(format!("user {}", id))));

        let engine = ScoringEngine::new(repos(users, active_weights()), settings())
            .await
            .unwrap();
        let err = engine
            .compute_score(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::NotFound);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_active_weights_rejected_at_startup() {
        let mut weights = MockWeightsRepository::new();
        weights.expect_get_active_weights().returning(|name| {
            Ok(ScoreWeightsConfig::new(
                name,
                1,
                ComponentWeights {
                    base: 0.9,
                    location_category: 0.3,
                    personalization: 0.3,
                },
            ))
        });

        let result = ScoringEngine::new(repos(MockUserRepository::new(), weights), settings()).await;
        assert!(matches!(result, Err(ScoringError::Validation(_))));
    }

    #[tokio::test]
    async fn test_publish_requires_newer_valid_version() {
        let engine = ScoringEngine::new(repos(MockUserRepository::new(), active_weights()), settings())
            .await
            .unwrap();

        let same = ScoreWeightsConfig::new("default", 1, ComponentWeights::default());
        assert!(engine.publish_weights(same).await.is_err());

        let other_family = ScoreWeightsConfig::new("experiment", 2, ComponentWeights::default());
        assert!(engine.publish_weights(other_family).await.is_err());

        let mut broken = ScoreWeightsConfig::new("default", 2, ComponentWeights::default());
        broken.base.fee.clear();
        assert!(engine.publish_weights(broken).await.is_err());
        assert_eq!(engine.active_weights().version, 1);

        let next = ScoreWeightsConfig::new("default", 2, ComponentWeights::default());
        let version = engine.publish_weights(next).await.unwrap();
        assert_eq!(version, WeightsVersion::new("default", 2));
        assert_eq!(engine.active_weights().version, 2);
    }

    #[tokio::test]
    async fn test_user_contexts_stay_within_capacity() {
        let store = Arc::new(InMemoryStore::new());
        store.put_weights(ScoreWeightsConfig::new("default", 1, ComponentWeights::default()), true);
        let job = Job {
            id: Uuid::new_v4(),
            location: Some(13),
            categories: vec!["warehouse_picking".into()],
            salary: Some(Salary {
                amount: 1500.0,
                salary_type: SalaryType::Hourly,
            }),
            fee: Some(5000),
            features: vec![],
            posted_at: Utc::now(),
            view_count: 0,
            apply_count: 0,
            revision: 1,
        };
        let job_id = job.id;
        store.insert_job(job);

        let mut settings = settings();
        settings.cache.max_entries = 20;
        let engine = ScoringEngine::new(Repositories::from_store(store.clone()), settings)
            .await
            .unwrap();

        for _ in 0..100 {
            let user = UserProfile {
                id: Uuid::new_v4(),
                estimated_location: None,
                preferences: UserPreferences {
                    salary_floor: None,
                    desired_categories: vec!["warehouse_picking".into()],
                    desired_locations: vec![13],
                },
                activity: ActivitySummary::default(),
                revision: 1,
            };
            let user_id = user.id;
            store.insert_user(user);
            engine.compute_score(user_id, job_id).await.unwrap();
        }

        assert!(engine.contexts.len() <= 20);
        assert!(engine.cache().len() <= 20);
    }
}
