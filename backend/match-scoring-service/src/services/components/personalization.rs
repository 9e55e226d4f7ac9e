//! Behavior-based personalization
//!
//! Two signals blend into the sub-score:
//! - affinity: how close the job is to the categories and locations the
//!   user has acted on, weighted by action strength and half-life decay
//! - collaborative boost: similarity-weighted share of neighbor users who
//!   clicked or applied to the job
//!
//! Neighbors are found on demand from a bounded candidate set (users who
//! acted on the same jobs) rather than from a precomputed similarity table.

use super::geo_category::GeoCategoryMatchCalculator;
use crate::models::{
    ActionType, GeoCategoryParams, Job, PersonalizationParams, PrefCode, ReferenceData,
    UserAction,
};
use crate::utils::{half_life_decay, normalize_to_peak, set_similarity};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub user_id: Uuid,
    pub similarity: f64,
}

fn action_weight(params: &PersonalizationParams, action: ActionType) -> f64 {
    match action {
        ActionType::View => params.view_weight,
        ActionType::Click => params.click_weight,
        ActionType::Apply => params.apply_weight,
    }
}

/// Co-actors ranked by how many of the user's jobs they touched, capped
pub fn candidate_neighbor_ids(user_id: Uuid, co_actions: &[UserAction], max: usize) -> Vec<Uuid> {
    let mut shared: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for action in co_actions.iter().filter(|a| a.user_id != user_id) {
        shared.entry(action.user_id).or_default().insert(action.job_id);
    }

    let mut ranked: Vec<(Uuid, usize)> = shared.into_iter().map(|(u, jobs)| (u, jobs.len())).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(max);
    ranked.into_iter().map(|(u, _)| u).collect()
}

/// Top-k most similar users by acted-on job sets
pub fn select_neighbors(
    user_id: Uuid,
    target_jobs: &HashSet<Uuid>,
    candidate_actions: &[UserAction],
    params: &PersonalizationParams,
) -> Vec<Neighbor> {
    let mut job_sets: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for action in candidate_actions.iter().filter(|a| a.user_id != user_id) {
        job_sets.entry(action.user_id).or_default().insert(action.job_id);
    }

    let mut neighbors: Vec<Neighbor> = job_sets
        .iter()
        .map(|(candidate, jobs)| Neighbor {
            user_id: *candidate,
            similarity: set_similarity(target_jobs, jobs, params.similarity),
        })
        .filter(|n| n.similarity > 0.0 && n.similarity >= params.min_similarity)
        .collect();

    neighbors.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.user_id.cmp(&b.user_id))
    });
    neighbors.truncate(params.top_k);
    neighbors
}

/// Per-user behavioral state prepared once and reused across jobs
#[derive(Debug, Clone, Default)]
pub struct UserHistory {
    pub user_id: Uuid,
    /// Actions inside the lookback window
    pub action_count: usize,
    pub neighbors: Vec<Neighbor>,
    category_weights: HashMap<String, f64>,
    major_weights: HashMap<String, f64>,
    location_weights: HashMap<PrefCode, f64>,
    category_peak: f64,
    major_peak: f64,
    location_peak: f64,
    /// job -> sum of similarity x action strength over neighbors
    neighbor_signals: HashMap<Uuid, f64>,
    similarity_total: f64,
}

impl UserHistory {
    pub fn cold(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn is_cold(&self) -> bool {
        self.action_count == 0
    }

    /// Fold the user's own actions and their neighbors' actions into
    /// decayed affinity tables and per-job neighbor signals
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        user_id: Uuid,
        actions: &[UserAction],
        acted_jobs: &HashMap<Uuid, Job>,
        neighbors: Vec<Neighbor>,
        neighbor_actions: &[UserAction],
        reference: &ReferenceData,
        params: &PersonalizationParams,
        now: DateTime<Utc>,
    ) -> Self {
        let mut history = Self::cold(user_id);
        history.action_count = actions.len();

        for action in actions {
            let Some(job) = acted_jobs.get(&action.job_id) else {
                continue;
            };
            let age_hours = (now - action.occurred_at).num_seconds() as f64 / 3600.0;
            let weight =
                action_weight(params, action.action) * half_life_decay(age_hours, params.half_life_hours);

            let mut majors: HashSet<&str> = HashSet::new();
            for category in &job.categories {
                *history.category_weights.entry(category.clone()).or_default() += weight;
                majors.insert(reference.major_category(category));
            }
            for major in majors {
                *history.major_weights.entry(major.to_string()).or_default() += weight;
            }
            if let Some(location) = job.location {
                *history.location_weights.entry(location).or_default() += weight;
            }
        }

        history.category_peak = peak(history.category_weights.values());
        history.major_peak = peak(history.major_weights.values());
        history.location_peak = peak(history.location_weights.values());

        let similarity: HashMap<Uuid, f64> =
            neighbors.iter().map(|n| (n.user_id, n.similarity)).collect();
        let mut strongest: HashMap<(Uuid, Uuid), f64> = HashMap::new();
        for action in neighbor_actions.iter().filter(|a| a.action.is_positive()) {
            if !similarity.contains_key(&action.user_id) {
                continue;
            }
            let strength = normalize_to_peak(action_weight(params, action.action), params.apply_weight);
            let entry = strongest.entry((action.user_id, action.job_id)).or_default();
            *entry = entry.max(strength);
        }
        for ((neighbor, job_id), strength) in strongest {
            *history.neighbor_signals.entry(job_id).or_default() += similarity[&neighbor] * strength;
        }

        history.similarity_total = neighbors.iter().map(|n| n.similarity).sum();
        history.neighbors = neighbors;
        history
    }

    /// Similarity-weighted share of neighbors with positive actions on the job
    pub fn collaborative_boost(&self, job_id: Uuid) -> f64 {
        let signal = self.neighbor_signals.get(&job_id).copied().unwrap_or(0.0);
        normalize_to_peak(signal, self.similarity_total)
    }
}

fn peak<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.copied().fold(0.0, f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonalizationScore {
    pub total: f64,
    pub affinity: f64,
    pub collaborative_boost: f64,
    pub neighbor_count: usize,
    pub sample_size: usize,
    pub cold_start: bool,
}

pub struct PersonalizationCalculator<'a> {
    params: &'a PersonalizationParams,
    geo: GeoCategoryMatchCalculator<'a>,
    geo_params: &'a GeoCategoryParams,
    reference: &'a ReferenceData,
}

impl<'a> PersonalizationCalculator<'a> {
    pub fn new(
        params: &'a PersonalizationParams,
        geo_params: &'a GeoCategoryParams,
        reference: &'a ReferenceData,
    ) -> Self {
        Self {
            params,
            geo: GeoCategoryMatchCalculator::new(geo_params, reference),
            geo_params,
            reference,
        }
    }

    pub fn score(&self, history: &UserHistory, job: &Job) -> PersonalizationScore {
        if history.is_cold() {
            return PersonalizationScore {
                total: self.params.cold_start_score,
                affinity: 0.0,
                collaborative_boost: 0.0,
                neighbor_count: 0,
                sample_size: 0,
                cold_start: true,
            };
        }

        let affinity = self.affinity(history, job);
        let boost = history.collaborative_boost(job.id);

        // Without neighbors the whole signal comes from the user's own history
        let blended = if history.neighbors.is_empty() {
            affinity
        } else {
            self.params.affinity_weight * affinity + self.params.cf_weight * boost
        };

        PersonalizationScore {
            total: (100.0 * blended).clamp(0.0, 100.0),
            affinity,
            collaborative_boost: boost,
            neighbor_count: history.neighbors.len(),
            sample_size: history.action_count,
            cold_start: false,
        }
    }

    /// 0-1 closeness of the job to the user's decayed interests
    pub fn affinity(&self, history: &UserHistory, job: &Job) -> f64 {
        self.geo_params.location_weight * self.location_affinity(history, job)
            + self.geo_params.category_weight * self.category_affinity(history, job)
    }

    fn category_affinity(&self, history: &UserHistory, job: &Job) -> f64 {
        let parent_factor = normalize_to_peak(
            self.geo_params.shared_parent_category,
            self.geo_params.exact_category,
        );

        job.categories
            .iter()
            .map(|category| {
                let exact = normalize_to_peak(
                    history.category_weights.get(category).copied().unwrap_or(0.0),
                    history.category_peak,
                );
                let major = self.reference.major_category(category);
                let shared = parent_factor
                    * normalize_to_peak(
                        history.major_weights.get(major).copied().unwrap_or(0.0),
                        history.major_peak,
                    );
                exact.max(shared)
            })
            .fold(0.0, f64::max)
    }

    fn location_affinity(&self, history: &UserHistory, job: &Job) -> f64 {
        let Some(job_location) = job.location else {
            return 0.0;
        };

        history
            .location_weights
            .iter()
            .map(|(location, weight)| {
                let relation = self.reference.location_relation(*location, job_location);
                let closeness =
                    normalize_to_peak(self.geo.location_points(relation), self.geo_params.same_location);
                closeness * normalize_to_peak(*weight, history.location_peak)
            })
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(location: Option<PrefCode>, categories: &[&str]) -> Job {
        Job {
            id: Uuid::new_v4(),
            location,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            salary: None,
            fee: None,
            features: vec![],
            posted_at: Utc::now(),
            view_count: 0,
            apply_count: 0,
            revision: 1,
        }
    }

    fn action(user_id: Uuid, job_id: Uuid, action: ActionType, hours_ago: i64) -> UserAction {
        UserAction {
            user_id,
            job_id,
            action,
            occurred_at: Utc::now() - Duration::hours(hours_ago),
        }
    }

    fn reference() -> ReferenceData {
        let mut reference = ReferenceData::default();
        reference.adjacency.insert(13, [14].into_iter().collect());
        reference
            .category_parents
            .insert("warehouse_picking".into(), "logistics".into());
        reference
            .category_parents
            .insert("delivery_driver".into(), "logistics".into());
        reference
    }

    #[test]
    fn test_cold_start_is_neutral() {
        let params = PersonalizationParams::default();
        let geo = GeoCategoryParams::default();
        let reference = ReferenceData::default();
        let calc = PersonalizationCalculator::new(&params, &geo, &reference);

        let score = calc.score(&UserHistory::cold(Uuid::new_v4()), &job(Some(13), &["x"]));
        assert_eq!(score.total, 50.0);
        assert!(score.cold_start);
    }

    #[test]
    fn test_affinity_follows_history() {
        let params = PersonalizationParams::default();
        let geo = GeoCategoryParams::default();
        let reference = reference();
        let user_id = Uuid::new_v4();

        let applied = job(Some(13), &["warehouse_picking"]);
        let actions = vec![action(user_id, applied.id, ActionType::Apply, 1)];
        let acted: HashMap<Uuid, Job> = [(applied.id, applied)].into_iter().collect();
        let history = UserHistory::build(
            user_id,
            &actions,
            &acted,
            vec![],
            &[],
            &reference,
            &params,
            Utc::now(),
        );
        let calc = PersonalizationCalculator::new(&params, &geo, &reference);

        let same = calc.score(&history, &job(Some(13), &["warehouse_picking"]));
        let sibling = calc.score(&history, &job(Some(14), &["delivery_driver"]));
        let unrelated = calc.score(&history, &job(Some(40), &["nursing"]));

        assert!((same.total - 100.0).abs() < 1e-9);
        assert!((sibling.total - 60.0).abs() < 1e-9);
        assert_eq!(unrelated.total, 0.0);
        assert_eq!(same.sample_size, 1);
    }

    #[test]
    fn test_recent_actions_outweigh_old_ones() {
        let params = PersonalizationParams::default();
        let geo = GeoCategoryParams::default();
        let reference = ReferenceData::default();
        let user_id = Uuid::new_v4();

        let recent = job(Some(1), &["recent_cat"]);
        let old = job(Some(2), &["old_cat"]);
        let actions = vec![
            action(user_id, recent.id, ActionType::Click, 1),
            action(user_id, old.id, ActionType::Click, 24 * 30),
        ];
        let acted: HashMap<Uuid, Job> =
            [(recent.id, recent), (old.id, old)].into_iter().collect();
        let history = UserHistory::build(
            user_id, &actions, &acted, vec![], &[], &reference, &params, Utc::now(),
        );
        let calc = PersonalizationCalculator::new(&params, &geo, &reference);

        let recent_score = calc.score(&history, &job(Some(1), &["recent_cat"]));
        let old_score = calc.score(&history, &job(Some(2), &["old_cat"]));
        assert!(recent_score.total > old_score.total);
    }

    #[test]
    fn test_select_neighbors_thresholds_and_top_k() {
        let params = PersonalizationParams {
            top_k: 1,
            ..Default::default()
        };
        let me = Uuid::new_v4();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        let (j1, j2, j3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let target: HashSet<Uuid> = [j1, j2].into_iter().collect();

        let candidate_actions = vec![
            action(close, j1, ActionType::View, 1),
            action(close, j2, ActionType::View, 1),
            action(far, j1, ActionType::View, 1),
            action(far, j3, ActionType::View, 1),
            action(me, j1, ActionType::View, 1),
        ];

        let neighbors = select_neighbors(me, &target, &candidate_actions, &params);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].user_id, close);
        assert!((neighbors[0].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_collaborative_boost_from_neighbors() {
        let params = PersonalizationParams::default();
        let reference = ReferenceData::default();
        let me = Uuid::new_v4();
        let (n1, n2) = (Uuid::new_v4(), Uuid::new_v4());
        let seen = job(None, &[]);
        let candidate = job(None, &[]);

        let actions = vec![action(me, seen.id, ActionType::View, 1)];
        let acted: HashMap<Uuid, Job> = [(seen.id, seen.clone())].into_iter().collect();
        let neighbors = vec![
            Neighbor { user_id: n1, similarity: 0.6 },
            Neighbor { user_id: n2, similarity: 0.4 },
        ];
        let neighbor_actions = vec![
            action(n1, candidate.id, ActionType::Apply, 2),
            action(n1, candidate.id, ActionType::View, 2),
            action(n2, candidate.id, ActionType::View, 2),
        ];
        let history = UserHistory::build(
            me,
            &actions,
            &acted,
            neighbors,
            &neighbor_actions,
            &reference,
            &params,
            Utc::now(),
        );

        // Only n1 acted positively, with full strength
        assert!((history.collaborative_boost(candidate.id) - 0.6).abs() < 1e-9);
        assert_eq!(history.collaborative_boost(Uuid::new_v4()), 0.0);
    }

    #[test]
    fn test_candidate_neighbor_ids_ranked_by_overlap() {
        let me = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (j1, j2) = (Uuid::new_v4(), Uuid::new_v4());
        let co = vec![
            action(a, j1, ActionType::View, 1),
            action(b, j1, ActionType::View, 1),
            action(b, j2, ActionType::Click, 1),
            action(me, j2, ActionType::Click, 1),
        ];
        assert_eq!(candidate_neighbor_ids(me, &co, 10), vec![b, a]);
        assert_eq!(candidate_neighbor_ids(me, &co, 1), vec![b]);
    }
}
