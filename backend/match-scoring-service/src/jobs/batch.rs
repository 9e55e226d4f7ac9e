// ============================================
// Batch Scoring Orchestrator
// ============================================
//
// Runs many (user, job) scoring items in the background and tracks them as a
// `BatchRun` that callers can poll, wait on or cancel.
//
// Workflow:
// 1. Resolve the weights version up front (invalid versions are rejected
//    before anything is spawned)
// 2. Resolve the plan: explicit ids, the job catalog, or all active users
// 3. For each user, build the shared context once, then score jobs in chunks
//    of `size` with a bounded number of items in flight
// 4. Each item is retried with backoff and bounded by its own timeout
// 5. Results are flushed to the result store per chunk, progress every
//    `progress_flush_every` settled items
//
// A run ends Completed, PartiallyFailed (failure rate above the threshold),
// Cancelled, or Failed when the plan cannot be read or the store is
// unreachable before any item starts.

use crate::config::BatchConfig;
use crate::error::{Result, ScoringError};
use crate::metrics::{BATCH_ITEMS, BATCH_RUNS, USER_SCORING_SECONDS};
use crate::models::{
    BatchMode, BatchProgress, BatchRun, BatchStatus, BatchStatusReport, ItemErrorSample, Job,
    ScoreResult, ScoreWeightsConfig,
};
use crate::services::{ScoringEngine, UserContext};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use resilience::{data_read_config, with_retry_if, with_timeout_result, RetryError};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Finished runs stay queryable in memory this long; the result store keeps them after that
const FINISHED_RUN_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Default)]
struct ProgressCounters {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
}

impl ProgressCounters {
    fn snapshot(&self) -> BatchProgress {
        let total = self.total.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        BatchProgress {
            total,
            completed,
            failed,
            retried: self.retried.load(Ordering::SeqCst),
            cancelled,
            pending: total.saturating_sub(completed + failed + cancelled),
        }
    }

    fn settled(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
            + self.failed.load(Ordering::SeqCst)
            + self.cancelled.load(Ordering::SeqCst)
    }
}

/// Live state of one run
struct RunState {
    run: Mutex<BatchRun>,
    counters: ProgressCounters,
    cancel_requested: AtomicBool,
    weights: Arc<ScoreWeightsConfig>,
    /// Items in flight across all users of the run
    permits: Semaphore,
    last_flushed: AtomicU64,
    status_tx: watch::Sender<BatchStatus>,
}

impl RunState {
    fn new(run: BatchRun, weights: Arc<ScoreWeightsConfig>, max_concurrency: usize) -> Self {
        let (status_tx, _) = watch::channel(run.status);
        Self {
            run: Mutex::new(run),
            counters: ProgressCounters::default(),
            cancel_requested: AtomicBool::new(false),
            weights,
            permits: Semaphore::new(max_concurrency.max(1)),
            last_flushed: AtomicU64::new(0),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelling(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> BatchRun {
        let mut run = self.lock().clone();
        run.progress = self.counters.snapshot();
        run
    }

    fn finished_before(&self, cutoff: chrono::DateTime<Utc>) -> bool {
        let run = self.lock();
        run.status.is_terminal() && run.finished_at.is_some_and(|at| at < cutoff)
    }

    /// Pending -> Running, or straight to Cancelled when cancel arrived first
    fn begin(&self) -> BatchStatus {
        let mut run = self.lock();
        let next = if self.is_cancelling() {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Running
        };
        apply_transition(&mut run, next);
        let status = run.status;
        drop(run);
        if status == BatchStatus::Running {
            self.publish(status);
        }
        status
    }

    /// Wake status watchers; terminal statuses are published after the run is persisted
    fn publish(&self, status: BatchStatus) {
        self.status_tx.send_replace(status);
    }

    fn request_cancel(&self) -> BatchStatus {
        let mut run = self.lock();
        self.cancel_requested.store(true, Ordering::SeqCst);
        if run.status == BatchStatus::Running {
            apply_transition(&mut run, BatchStatus::Cancelling);
        }
        let status = run.status;
        drop(run);
        self.publish(status);
        status
    }

    /// Move to the terminal status the counters and flags call for
    fn finish(&self, fatal: Option<String>, failure_threshold: f64) -> BatchStatus {
        let progress = self.counters.snapshot();
        let mut run = self.lock();
        let target = if fatal.is_some() {
            BatchStatus::Failed
        } else if self.is_cancelling() {
            BatchStatus::Cancelled
        } else if progress.failure_rate() > failure_threshold {
            BatchStatus::PartiallyFailed
        } else {
            BatchStatus::Completed
        };

        if target == BatchStatus::Cancelled && run.status == BatchStatus::Running {
            apply_transition(&mut run, BatchStatus::Cancelling);
        }
        if let Some(message) = fatal {
            run.error_summary.fatal = Some(message);
        }
        if !apply_transition(&mut run, target) {
            warn!(
                run_id = %run.id,
                from = run.status.as_str(),
                to = target.as_str(),
                "Illegal batch status transition"
            );
        }
        run.progress = progress;
        run.status
    }

    fn record_failures(
        &self,
        user_id: Uuid,
        job_id: Option<Uuid>,
        items: u64,
        error: &ScoringError,
        attempts: u32,
        sample_limit: usize,
    ) {
        self.counters.failed.fetch_add(items, Ordering::SeqCst);
        BATCH_ITEMS.with_label_values(&["failed"]).inc_by(items);

        let mut run = self.lock();
        *run
            .error_summary
            .counts_by_kind
            .entry(error.label().to_string())
            .or_insert(0) += items;
        if run.error_summary.samples.len() < sample_limit {
            run.error_summary.samples.push(ItemErrorSample {
                user_id,
                job_id,
                kind: error.label().to_string(),
                message: error.to_string(),
                attempts,
            });
        }
    }

    fn record_cancelled(&self, items: u64) {
        if items == 0 {
            return;
        }
        self.counters.cancelled.fetch_add(items, Ordering::SeqCst);
        BATCH_ITEMS.with_label_values(&["cancelled"]).inc_by(items);
    }
}

fn apply_transition(run: &mut BatchRun, next: BatchStatus) -> bool {
    if !run.status.can_transition_to(next) {
        return false;
    }
    run.status = next;
    if next == BatchStatus::Running {
        run.started_at = Some(Utc::now());
    } else if next.is_terminal() {
        run.finished_at = Some(Utc::now());
    }
    true
}

/// Where a user's jobs come from
enum JobSource {
    Listed(Vec<Uuid>),
    Candidates(usize),
}

struct UserPlan {
    user_id: Uuid,
    jobs: JobSource,
}

pub struct BatchOrchestrator {
    engine: Arc<ScoringEngine>,
    config: BatchConfig,
    runs: DashMap<Uuid, Arc<RunState>>,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<ScoringEngine>, config: BatchConfig) -> Self {
        Self {
            engine,
            config,
            runs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Validate the request, register a Pending run and start it in the background
    pub async fn start_batch(
        self: &Arc<Self>,
        mode: BatchMode,
        weights_version: Option<u32>,
    ) -> Result<Uuid> {
        if let BatchMode::BulkMultiUser {
            candidates_per_user: Some(0),
            ..
        } = mode
        {
            return Err(ScoringError::Validation(
                "candidates_per_user must be positive".into(),
            ));
        }
        let weights = self.engine.resolve_weights(weights_version).await?;

        let cutoff = Utc::now() - chrono::Duration::seconds(FINISHED_RUN_RETENTION_SECS);
        self.runs.retain(|_, state| !state.finished_before(cutoff));

        let run = BatchRun::new(mode, weights.version_id());
        let run_id = run.id;
        info!(
            %run_id,
            mode = run.mode.as_str(),
            weights = %run.weights_version,
            "Batch run accepted"
        );

        let state = Arc::new(RunState::new(run, weights, self.config.max_concurrency));
        self.runs.insert(run_id, state.clone());
        self.persist(&state).await;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.execute(&state).await;
        });

        Ok(run_id)
    }

    pub async fn get_batch_status(&self, run_id: Uuid) -> Result<BatchStatusReport> {
        if let Some(state) = self.live_run(run_id) {
            return Ok(state.snapshot().report());
        }
        match self.engine.repos().results.get_batch_run(run_id).await? {
            Some(run) => Ok(run.report()),
            None => Err(ScoringError::NotFound(format!("batch run {}", run_id))),
        }
    }

    /// Request cancellation; in-flight items finish, unstarted items are counted as cancelled
    pub async fn cancel_batch(&self, run_id: Uuid) -> Result<BatchStatus> {
        if let Some(state) = self.live_run(run_id) {
            let status = state.request_cancel();
            info!(%run_id, status = status.as_str(), "Batch cancellation requested");
            return Ok(status);
        }
        match self.engine.repos().results.get_batch_run(run_id).await? {
            Some(run) if run.status.is_terminal() => Ok(run.status),
            Some(_) => Err(ScoringError::Internal(format!(
                "batch run {} is not owned by this process",
                run_id
            ))),
            None => Err(ScoringError::NotFound(format!("batch run {}", run_id))),
        }
    }

    /// Resolve once the run reaches a terminal status
    pub async fn wait_for_completion(&self, run_id: Uuid) -> Result<BatchStatusReport> {
        let Some(state) = self.live_run(run_id) else {
            return self.get_batch_status(run_id).await;
        };
        let mut rx = state.status_tx.subscribe();
        rx.wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| ScoringError::Internal(format!("batch run {} was dropped", run_id)))?;
        Ok(state.snapshot().report())
    }

    fn live_run(&self, run_id: Uuid) -> Option<Arc<RunState>> {
        self.runs.get(&run_id).map(|entry| entry.value().clone())
    }

    async fn execute(&self, state: &RunState) {
        let started = Instant::now();
        let run_id = state.lock().id;

        if state.begin() == BatchStatus::Cancelled {
            info!(%run_id, "Batch cancelled before start");
            BATCH_RUNS.with_label_values(&["cancelled"]).inc();
            self.persist(state).await;
            state.publish(BatchStatus::Cancelled);
            return;
        }
        self.persist(state).await;

        let fatal = match self.run_items(state).await {
            Ok(()) => None,
            Err(e) => {
                error!(%run_id, error = %e, "Batch plan could not be resolved");
                Some(e.to_string())
            }
        };

        let status = state.finish(fatal, self.config.failure_threshold);
        BATCH_RUNS.with_label_values(&[status.as_str()]).inc();
        self.persist(state).await;
        state.publish(status);

        let progress = state.counters.snapshot();
        info!(
            %run_id,
            status = status.as_str(),
            total = progress.total,
            completed = progress.completed,
            failed = progress.failed,
            retried = progress.retried,
            cancelled = progress.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch run finished"
        );
    }

    async fn run_items(&self, state: &RunState) -> Result<()> {
        let plans = self.resolve_plans(state).await?;
        debug!(users = plans.len(), "Batch plan resolved");

        stream::iter(plans)
            .for_each_concurrent(self.config.user_parallelism.max(1), |plan| {
                self.process_user(state, plan)
            })
            .await;
        Ok(())
    }

    async fn resolve_plans(&self, state: &RunState) -> Result<Vec<UserPlan>> {
        let mode = state.lock().mode.clone();
        let repos = self.engine.repos();

        let named_user = match &mode {
            BatchMode::SingleUser { user_id, .. } => Some(*user_id),
            BatchMode::BulkMultiUser {
                user_ids: Some(ids),
                ..
            } => ids.first().copied(),
            BatchMode::BulkMultiUser { user_ids: None, .. } => None,
        };
        if let Some(user_id) = named_user {
            self.ensure_store_reachable(user_id).await?;
        }

        let plans = match mode {
            BatchMode::SingleUser {
                user_id,
                job_ids: Some(job_ids),
            } => vec![UserPlan {
                user_id,
                jobs: JobSource::Listed(dedup(job_ids)),
            }],
            BatchMode::SingleUser {
                user_id,
                job_ids: None,
            } => {
                let limit = self.config.catalog_limit;
                let job_ids = read_with_retry(|| repos.jobs.list_job_ids(limit))
                    .await
                    .map_err(RetryError::into_inner)?;
                vec![UserPlan {
                    user_id,
                    jobs: JobSource::Listed(job_ids),
                }]
            }
            BatchMode::BulkMultiUser {
                user_ids,
                candidates_per_user,
            } => {
                let user_ids = match user_ids {
                    Some(ids) => dedup(ids),
                    None => {
                        let limit = self.config.active_user_limit;
                        read_with_retry(|| repos.users.list_active_user_ids(limit))
                            .await
                            .map_err(RetryError::into_inner)?
                    }
                };
                let limit = candidates_per_user
                    .unwrap_or(self.engine.settings().ranking.candidate_limit);
                user_ids
                    .into_iter()
                    .map(|user_id| UserPlan {
                        user_id,
                        jobs: JobSource::Candidates(limit),
                    })
                    .collect()
            }
        };
        Ok(plans)
    }

    /// Read one named user so an unreachable store fails the run instead
    /// of every item; a missing user only fails that user's items later
    async fn ensure_store_reachable(&self, user_id: Uuid) -> Result<()> {
        match read_with_retry(|| self.engine.repos().users.get_user_revision(user_id)).await {
            Ok(_) => Ok(()),
            Err(e) => match e.into_inner() {
                ScoringError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn process_user(&self, state: &RunState, plan: UserPlan) {
        let started = Instant::now();
        let user_id = plan.user_id;

        if state.is_cancelling() {
            if let JobSource::Listed(ids) = &plan.jobs {
                state
                    .counters
                    .total
                    .fetch_add(ids.len() as u64, Ordering::SeqCst);
                state.record_cancelled(ids.len() as u64);
            }
            return;
        }

        let (job_ids, mut prefetched) = match plan.jobs {
            JobSource::Listed(ids) => (ids, HashMap::new()),
            JobSource::Candidates(limit) => {
                match read_with_retry(|| {
                    self.engine.repos().jobs.list_candidate_jobs(user_id, limit)
                })
                .await
                {
                    Ok(jobs) => {
                        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
                        let by_id: HashMap<Uuid, Job> =
                            jobs.into_iter().map(|j| (j.id, j)).collect();
                        (ids, by_id)
                    }
                    Err(e) => {
                        warn!(%user_id, error = %e, "Candidate jobs could not be listed");
                        state.counters.total.fetch_add(1, Ordering::SeqCst);
                        let attempts = e.attempts();
                        state.record_failures(
                            user_id,
                            None,
                            1,
                            &e.into_inner(),
                            attempts,
                            self.config.error_sample_limit,
                        );
                        return;
                    }
                }
            }
        };

        let items = job_ids.len() as u64;
        state.counters.total.fetch_add(items, Ordering::SeqCst);
        if items == 0 {
            return;
        }

        let context = match read_with_retry(|| self.engine.user_context(user_id, &state.weights))
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!(%user_id, error = %e, "User context unavailable, failing its items");
                let attempts = e.attempts();
                state.record_failures(
                    user_id,
                    None,
                    items,
                    &e.into_inner(),
                    attempts,
                    self.config.error_sample_limit,
                );
                return;
            }
        };

        let chunk_size = self.config.size.max(1);
        for (index, chunk) in job_ids.chunks(chunk_size).enumerate() {
            if state.is_cancelling() {
                let remaining = job_ids.len() - index * chunk_size;
                state.record_cancelled(remaining as u64);
                break;
            }

            let missing: Vec<Uuid> = chunk
                .iter()
                .filter(|id| !prefetched.contains_key(*id))
                .copied()
                .collect();
            if !missing.is_empty() {
                match read_with_retry(|| self.engine.repos().jobs.get_jobs(&missing)).await {
                    Ok(jobs) => prefetched.extend(jobs.into_iter().map(|j| (j.id, j))),
                    Err(e) => {
                        warn!(%user_id, error = %e, "Bulk job read failed, reading jobs one by one")
                    }
                }
            }

            let work: Vec<(Uuid, Option<Job>)> = chunk
                .iter()
                .map(|id| (*id, prefetched.get(id).cloned()))
                .collect();
            let results: Vec<Arc<ScoreResult>> = stream::iter(work)
                .map(|(job_id, job)| self.process_item(state, context.clone(), job_id, job))
                .buffer_unordered(self.config.max_concurrency.max(1))
                .filter_map(|outcome| async move { outcome })
                .collect()
                .await;

            self.flush_results(user_id, &results).await;
            self.flush_progress(state).await;
        }

        USER_SCORING_SECONDS.observe(started.elapsed().as_secs_f64());
    }

    async fn process_item(
        &self,
        state: &RunState,
        context: Arc<UserContext>,
        job_id: Uuid,
        job: Option<Job>,
    ) -> Option<Arc<ScoreResult>> {
        if state.is_cancelling() {
            state.record_cancelled(1);
            return None;
        }
        let Ok(_permit) = state.permits.acquire().await else {
            state.record_cancelled(1);
            return None;
        };
        if state.is_cancelling() {
            state.record_cancelled(1);
            return None;
        }

        let timeout = self.config.item_timeout();
        let outcome = with_retry_if(
            self.config.retry_config(),
            ScoringError::is_retryable,
            |attempt, error| {
                state.counters.retried.fetch_add(1, Ordering::SeqCst);
                BATCH_ITEMS.with_label_values(&["retried"]).inc();
                debug!(user_id = %context.user.id, %job_id, attempt, %error, "Retrying item");
            },
            || {
                with_timeout_result(
                    timeout,
                    self.score_item(&context, job_id, job.as_ref(), &state.weights),
                    |elapsed| ScoringError::ComputationTimeout(elapsed.as_millis() as u64),
                )
            },
        )
        .await;

        match outcome {
            Ok(result) => {
                state.counters.completed.fetch_add(1, Ordering::SeqCst);
                BATCH_ITEMS.with_label_values(&["completed"]).inc();
                Some(result)
            }
            Err(e) => {
                let attempts = e.attempts();
                let error = e.into_inner();
                debug!(user_id = %context.user.id, %job_id, attempts, %error, "Item failed");
                state.record_failures(
                    context.user.id,
                    Some(job_id),
                    1,
                    &error,
                    attempts,
                    self.config.error_sample_limit,
                );
                None
            }
        }
    }

    async fn score_item(
        &self,
        context: &UserContext,
        job_id: Uuid,
        job: Option<&Job>,
        weights: &ScoreWeightsConfig,
    ) -> Result<Arc<ScoreResult>> {
        match job {
            Some(job) => self.engine.score_prepared(context, job, weights).await,
            None => {
                let job = self.engine.repos().jobs.get_job(job_id).await?;
                self.engine.score_prepared(context, &job, weights).await
            }
        }
    }

    async fn flush_results(&self, user_id: Uuid, results: &[Arc<ScoreResult>]) {
        if results.is_empty() {
            return;
        }
        let owned: Vec<ScoreResult> = results.iter().map(|r| ScoreResult::clone(r)).collect();
        if let Err(e) = self.engine.repos().results.save_score_results(&owned).await {
            warn!(%user_id, count = owned.len(), error = %e, "Failed to persist score results");
        }
    }

    async fn flush_progress(&self, state: &RunState) {
        let settled = state.counters.settled();
        let last = state.last_flushed.load(Ordering::SeqCst);
        if settled.saturating_sub(last) < self.config.progress_flush_every.max(1) {
            return;
        }
        if state
            .last_flushed
            .compare_exchange(last, settled, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.persist(state).await;
        }
    }

    async fn persist(&self, state: &RunState) {
        let run = state.snapshot();
        if let Err(e) = self.engine.repos().results.save_batch_run(&run).await {
            warn!(run_id = %run.id, error = %e, "Failed to persist batch run");
        }
    }
}

/// Repository read under the shared read policy
async fn read_with_retry<T, F, Fut>(
    mut read: F,
) -> std::result::Result<T, RetryError<ScoringError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = data_read_config();
    let deadline = policy.deadline;
    with_retry_if(
        policy.retry,
        ScoringError::is_retryable,
        |_, _| {},
        || {
            with_timeout_result(deadline, read(), |elapsed| {
                ScoringError::ComputationTimeout(elapsed.as_millis() as u64)
            })
        },
    )
    .await
}

/// Drop repeated ids, keeping first occurrence order
fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentWeights, WeightsVersion};

    fn run() -> BatchRun {
        BatchRun::new(
            BatchMode::SingleUser {
                user_id: Uuid::new_v4(),
                job_ids: None,
            },
            WeightsVersion::new("default", 1),
        )
    }

    fn state() -> RunState {
        let weights = ScoreWeightsConfig::new("default", 1, ComponentWeights::default());
        RunState::new(run(), Arc::new(weights), 4)
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup(vec![a, b, a, b, a]), vec![a, b]);
    }

    #[test]
    fn test_cancel_before_start_goes_straight_to_cancelled() {
        let state = state();
        assert_eq!(state.request_cancel(), BatchStatus::Pending);
        assert_eq!(state.begin(), BatchStatus::Cancelled);
        assert!(state.lock().finished_at.is_some());
    }

    #[test]
    fn test_cancel_while_running_passes_through_cancelling() {
        let state = state();
        assert_eq!(state.begin(), BatchStatus::Running);
        assert_eq!(state.request_cancel(), BatchStatus::Cancelling);
        assert_eq!(state.finish(None, 0.5), BatchStatus::Cancelled);
    }

    #[test]
    fn test_finish_applies_failure_threshold() {
        let state = state();
        state.begin();
        state.counters.total.store(10, Ordering::SeqCst);
        state.counters.completed.store(7, Ordering::SeqCst);
        state.counters.failed.store(3, Ordering::SeqCst);
        assert_eq!(state.finish(None, 0.2), BatchStatus::PartiallyFailed);

        let state = self::state();
        state.begin();
        state.counters.total.store(10, Ordering::SeqCst);
        state.counters.completed.store(9, Ordering::SeqCst);
        state.counters.failed.store(1, Ordering::SeqCst);
        assert_eq!(state.finish(None, 0.2), BatchStatus::Completed);
    }

    #[test]
    fn test_fatal_error_fails_the_run() {
        let state = state();
        state.begin();
        let status = state.finish(Some("store is unavailable".into()), 0.5);
        assert_eq!(status, BatchStatus::Failed);
        assert_eq!(
            state.lock().error_summary.fatal.as_deref(),
            Some("store is unavailable")
        );
    }

    #[test]
    fn test_error_samples_are_capped_but_counts_are_not() {
        let state = state();
        let user = Uuid::new_v4();
        let error = ScoringError::DataUnavailable("job read failed".into());
        for _ in 0..5 {
            state.record_failures(user, Some(Uuid::new_v4()), 1, &error, 3, 2);
        }
        state.record_failures(user, None, 4, &error, 1, 2);

        let run = state.snapshot();
        assert_eq!(run.progress.failed, 9);
        assert_eq!(run.error_summary.counts_by_kind["data_unavailable"], 9);
        assert_eq!(run.error_summary.samples.len(), 2);
        assert_eq!(run.error_summary.samples[0].attempts, 3);
    }

    #[test]
    fn test_pending_is_derived_from_counters() {
        let state = state();
        state.counters.total.store(10, Ordering::SeqCst);
        state.counters.completed.store(4, Ordering::SeqCst);
        state.counters.failed.store(1, Ordering::SeqCst);
        state.record_cancelled(2);
        let progress = state.counters.snapshot();
        assert_eq!(progress.pending, 3);
        assert_eq!(progress.cancelled, 2);
    }
}
