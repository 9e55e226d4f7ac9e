//! Composite scorer
//!
//! Blends the three component sub-scores with the active weights and
//! derives confidence, reasons and recommendations from the same inputs.
//! Deterministic: identical inputs and weights produce an identical result
//! (apart from the caller-supplied `computed_at`).

use super::components::{
    BaseScoreCalculator, GeoCategoryMatchCalculator, PersonalizationCalculator, UserHistory,
};
use crate::models::weights::MAX_BASE_POINTS;
use crate::models::{
    ComponentScores, Job, ReferenceData, ScoreBreakdown, ScoreComponent, ScoreResult,
    ScoreWeightsConfig, UserProfile,
};
use crate::utils::clamp_score;
use chrono::{DateTime, Utc};

/// Sub-scores at or above this count as a reason to show the job
const REASON_MIN_SCORE: f64 = 50.0;
const MAX_REASONS: usize = 3;

/// Everything needed to score one (user, job) pair
pub struct ScoringInputs<'a> {
    pub user: &'a UserProfile,
    pub job: &'a Job,
    pub history: &'a UserHistory,
    pub reference: &'a ReferenceData,
}

pub struct CompositeScorer<'a> {
    config: &'a ScoreWeightsConfig,
}

impl<'a> CompositeScorer<'a> {
    pub fn new(config: &'a ScoreWeightsConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, inputs: &ScoringInputs<'_>, computed_at: DateTime<Utc>) -> ScoreResult {
        let config = self.config;

        let base = BaseScoreCalculator::new(&config.base).score(inputs.job);
        let geo = GeoCategoryMatchCalculator::new(&config.geo, inputs.reference)
            .score(inputs.user, inputs.job);
        let personalization =
            PersonalizationCalculator::new(&config.personalization, &config.geo, inputs.reference)
                .score(inputs.history, inputs.job);

        // The base sub-score keeps its 0-80 scale
        let components = ComponentScores {
            base: base.total.clamp(0.0, MAX_BASE_POINTS),
            location_category: clamp_score(geo.total),
            personalization: clamp_score(personalization.total),
        };

        let w = &config.weights;
        let overall = clamp_score(
            w.base * components.base
                + w.location_category * components.location_category
                + w.personalization * components.personalization,
        );

        let breakdown = ScoreBreakdown {
            fee_points: base.fee_points,
            salary_points: base.salary_points,
            feature_points: base.feature_points,
            base_inputs_present: base.inputs_present,
            location_score: geo.location_score,
            category_score: geo.category_score,
            location_known: geo.location_known,
            category_known: geo.category_known,
            affinity: personalization.affinity,
            collaborative_boost: personalization.collaborative_boost,
            neighbor_count: personalization.neighbor_count,
            action_sample_size: personalization.sample_size,
            cold_start: personalization.cold_start,
        };

        ScoreResult {
            user_id: inputs.user.id,
            job_id: inputs.job.id,
            overall_score: overall,
            components,
            confidence: self.confidence(&breakdown),
            reasons: self.reasons(&components, &breakdown),
            recommendations: self.recommendations(&components, &breakdown),
            breakdown,
            weights_version: config.version_id(),
            computed_at,
        }
    }

    /// Data completeness scaled by how much behavior backs the estimate
    pub fn confidence(&self, breakdown: &ScoreBreakdown) -> f64 {
        let p = &self.config.personalization;

        let geo_known =
            (breakdown.location_known as u8 + breakdown.category_known as u8) as f64 / 2.0;
        let personalization_known = if breakdown.cold_start { 0.0 } else { 1.0 };
        let completeness = (breakdown.base_inputs_present + geo_known + personalization_known) / 3.0;

        let sample = (breakdown.action_sample_size as f64 / p.full_confidence_actions as f64).min(1.0);
        let confidence = completeness * (1.0 - p.sample_weight + p.sample_weight * sample);
        confidence.clamp(0.0, 1.0)
    }

    /// Strongest contributors first
    fn reasons(&self, components: &ComponentScores, breakdown: &ScoreBreakdown) -> Vec<String> {
        let w = &self.config.weights;
        let mut contributing: Vec<(ScoreComponent, f64)> = ScoreComponent::ALL
            .iter()
            .filter(|c| **c != ScoreComponent::Personalization || !breakdown.cold_start)
            .filter(|c| components.get(**c) >= REASON_MIN_SCORE)
            .map(|c| {
                let weight = match c {
                    ScoreComponent::Base => w.base,
                    ScoreComponent::LocationCategory => w.location_category,
                    ScoreComponent::Personalization => w.personalization,
                };
                (*c, weight * components.get(*c))
            })
            .filter(|(_, contribution)| *contribution > 0.0)
            .collect();
        contributing.sort_by(|a, b| b.1.total_cmp(&a.1));

        contributing
            .into_iter()
            .take(MAX_REASONS)
            .map(|(component, _)| reason_text(component, breakdown))
            .collect()
    }

    /// Advice on the weakest component the user can act on
    fn recommendations(&self, components: &ComponentScores, breakdown: &ScoreBreakdown) -> Vec<String> {
        let mut advice = Vec::new();

        if !breakdown.location_known || !breakdown.category_known {
            advice.push((
                components.location_category,
                "Add preferred locations and job categories to sharpen your matches".to_string(),
            ));
        } else if components.location_category < REASON_MIN_SCORE {
            advice.push((
                components.location_category,
                "Widen your preferred areas or categories to see closer matches".to_string(),
            ));
        }

        if breakdown.cold_start {
            advice.push((
                components.personalization,
                "Browse and save jobs so we can learn what you like".to_string(),
            ));
        } else if components.personalization < REASON_MIN_SCORE {
            advice.push((
                components.personalization,
                "This job differs from the ones you usually engage with".to_string(),
            ));
        }

        advice.sort_by(|a, b| a.0.total_cmp(&b.0));
        advice.into_iter().take(1).map(|(_, text)| text).collect()
    }
}

fn reason_text(component: ScoreComponent, breakdown: &ScoreBreakdown) -> String {
    match component {
        ScoreComponent::Base => {
            if breakdown.fee_points >= breakdown.salary_points {
                "Strong referral fee for this job".to_string()
            } else {
                "Pay is above the typical range".to_string()
            }
        }
        ScoreComponent::LocationCategory => {
            if breakdown.location_score >= breakdown.category_score {
                "Located in or near your preferred area".to_string()
            } else {
                "Matches your desired job category".to_string()
            }
        }
        ScoreComponent::Personalization => {
            if breakdown.collaborative_boost > breakdown.affinity {
                "Popular with users whose activity resembles yours".to_string()
            } else {
                "Similar to jobs you have engaged with".to_string()
            }
        }
    }
}
