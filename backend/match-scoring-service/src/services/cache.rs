//! In-process score cache with per-key request coalescing
//!
//! Entries are keyed by (user, job, weights version). Each key owns a
//! `OnceCell`, so concurrent misses for the same key run one computation and
//! every caller receives the same `Arc<ScoreResult>`. Misses on different
//! keys never wait on each other.
//!
//! An entry is stale when its TTL has passed, when it was built under a
//! different weights version than its key names, or when the caller's
//! freshness tokens no longer match the revisions it was computed from.
//! Stale entries are replaced in place; failed computations leave no entry.

use crate::error::{Result, ScoringError};
use crate::metrics::{
    SCORE_CACHE_COALESCED, SCORE_CACHE_EVICTION, SCORE_CACHE_HIT, SCORE_CACHE_INVALIDATION,
    SCORE_CACHE_MISS,
};
use crate::models::{ScoreResult, WeightsVersion};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub weights_version: WeightsVersion,
}

impl CacheKey {
    pub fn new(user_id: Uuid, job_id: Uuid, weights_version: WeightsVersion) -> Self {
        Self {
            user_id,
            job_id,
            weights_version,
        }
    }
}

/// Upstream revisions a result was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub user_revision: i64,
    pub job_revision: i64,
}

#[derive(Debug)]
struct CachedScore {
    result: Arc<ScoreResult>,
    freshness: Freshness,
    expires_at: Instant,
}

type Slot = Arc<OnceCell<CachedScore>>;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entries: usize,
}

pub struct ScoreCache {
    entries: DashMap<CacheKey, Slot>,
    ttl: Duration,
    max_entries: usize,
    counters: Counters,
}

impl ScoreCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            counters: Counters::default(),
        }
    }

    /// Return the cached result or run `compute` exactly once per key
    ///
    /// `freshness` is checked against the stored entry when given; `compute`
    /// reports the revisions its result was built from. A result built under
    /// another weights version than the key names is evicted and computed
    /// once more.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        freshness: Option<Freshness>,
        compute: F,
    ) -> Result<Arc<ScoreResult>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(ScoreResult, Freshness)>>,
    {
        if let Some(result) = self.load(key, freshness, &compute).await? {
            return Ok(result);
        }
        self.load(key, freshness, &compute).await?.ok_or_else(|| {
            ScoringError::Internal(format!(
                "score for user {} job {} is not produced under {}",
                key.user_id, key.job_id, key.weights_version
            ))
        })
    }

    /// One single-flight pass; `None` when the computed result named the
    /// wrong weights version and was evicted
    async fn load<F, Fut>(
        &self,
        key: &CacheKey,
        freshness: Option<Freshness>,
        compute: &F,
    ) -> Result<Option<Arc<ScoreResult>>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(ScoreResult, Freshness)>>,
    {
        let slot = self.slot_for(key, freshness);
        if let Some(cached) = slot.get() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            SCORE_CACHE_HIT.inc();
            return Ok(Some(cached.result.clone()));
        }

        let computed = AtomicBool::new(false);
        let flag = &computed;
        let ttl = self.ttl;
        let outcome = slot
            .get_or_try_init(|| async move {
                flag.store(true, Ordering::Relaxed);
                let (result, built_from) = compute().await?;
                Ok::<_, ScoringError>(CachedScore {
                    result: Arc::new(result),
                    freshness: built_from,
                    expires_at: Instant::now() + ttl,
                })
            })
            .await;

        let cached = match outcome {
            Ok(cached) => cached,
            Err(e) => {
                self.entries
                    .remove_if(key, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                return Err(e);
            }
        };

        if computed.load(Ordering::Relaxed) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            SCORE_CACHE_MISS.inc();
        } else {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            SCORE_CACHE_COALESCED.inc();
        }

        if cached.result.weights_version != key.weights_version {
            let err = ScoringError::CacheInconsistency(format!(
                "result for job {} built under {}, expected {}",
                key.job_id, cached.result.weights_version, key.weights_version
            ));
            warn!("{}; evicting and recomputing", err);
            self.entries.remove_if(key, |_, s| Arc::ptr_eq(s, &slot));
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            SCORE_CACHE_EVICTION.inc();
            return Ok(None);
        }

        let result = cached.result.clone();
        self.enforce_capacity();
        Ok(Some(result))
    }

    pub fn invalidate_user(&self, user_id: Uuid) -> usize {
        self.invalidate_where(|key| key.user_id == user_id)
    }

    pub fn invalidate_job(&self, job_id: Uuid) -> usize {
        self.invalidate_where(|key| key.job_id == job_id)
    }

    /// Drop every entry not built under `active`
    pub fn retain_version(&self, active: &WeightsVersion) -> usize {
        self.invalidate_where(|key| &key.weights_version != active)
    }

    pub fn clear(&self) -> usize {
        self.invalidate_where(|_| true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Slot for `key`, replacing a stale one under the shard lock
    fn slot_for(&self, key: &CacheKey, freshness: Option<Freshness>) -> Slot {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()));

        let stale = match entry.value().get() {
            Some(cached) => self.is_stale(cached, key, freshness),
            None => false,
        };
        if stale {
            *entry.value_mut() = Arc::new(OnceCell::new());
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            SCORE_CACHE_EVICTION.inc();
        }
        entry.value().clone()
    }

    fn is_stale(&self, cached: &CachedScore, key: &CacheKey, freshness: Option<Freshness>) -> bool {
        if Instant::now() >= cached.expires_at {
            return true;
        }
        if cached.result.weights_version != key.weights_version {
            let err = ScoringError::CacheInconsistency(format!(
                "entry for user {} job {} holds {}, key names {}",
                key.user_id, key.job_id, cached.result.weights_version, key.weights_version
            ));
            warn!("{}; evicting", err);
            return true;
        }
        matches!(freshness, Some(f) if f != cached.freshness)
    }

    fn invalidate_where(&self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let matched = predicate(key);
            if matched {
                removed += 1;
            }
            !matched
        });

        if removed > 0 {
            self.counters
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            SCORE_CACHE_INVALIDATION.inc_by(removed as u64);
            debug!(removed, "Invalidated score cache entries");
        }
        removed
    }

    /// Expired entries go first; if still over capacity, drop a tenth
    fn enforce_capacity(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }

        let now = Instant::now();
        let mut evicted = 0u64;
        self.entries.retain(|_, slot| match slot.get() {
            Some(cached) if now >= cached.expires_at => {
                evicted += 1;
                false
            }
            _ => true,
        });

        let len = self.entries.len();
        if len > self.max_entries {
            let target = self.max_entries - self.max_entries / 10;
            let victims: Vec<CacheKey> = self
                .entries
                .iter()
                .filter(|e| e.value().initialized())
                .take(len.saturating_sub(target))
                .map(|e| e.key().clone())
                .collect();
            for key in victims {
                if self.entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            SCORE_CACHE_EVICTION.inc_by(evicted);
            debug!(evicted, "Score cache over capacity, evicted entries");
        }
    }
}
