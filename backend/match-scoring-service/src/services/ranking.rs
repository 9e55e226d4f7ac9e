use crate::error::{Result, ScoringError};
use crate::models::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// How a section picks its members from the remaining candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SelectionRule {
    HighestScore,
    /// Newest postings, then shown in score order
    MostRecent,
    /// Only the listed jobs, when they are candidates
    Pinned { job_ids: Vec<Uuid> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    pub max_items: usize,
    #[serde(flatten)]
    pub rule: SelectionRule,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl SectionConfig {
    pub fn new(name: impl Into<String>, max_items: usize, rule: SelectionRule) -> Self {
        Self {
            name: name.into(),
            max_items,
            rule,
            min_score: None,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Layout of the personalized digest
    pub fn default_digest() -> Vec<SectionConfig> {
        vec![
            SectionConfig::new("top_picks", 5, SelectionRule::HighestScore).with_min_score(60.0),
            SectionConfig::new("new_arrivals", 5, SelectionRule::MostRecent),
            SectionConfig::new("more_matches", 10, SelectionRule::HighestScore),
        ]
    }

    pub fn validate_all(sections: &[SectionConfig]) -> Result<()> {
        if sections.is_empty() {
            return Err(ScoringError::Configuration(
                "at least one ranking section is required".into(),
            ));
        }

        let mut names = HashSet::new();
        for section in sections {
            if section.name.trim().is_empty() {
                return Err(ScoringError::Configuration("section name is empty".into()));
            }
            if !names.insert(section.name.as_str()) {
                return Err(ScoringError::Configuration(format!(
                    "duplicate section {}",
                    section.name
                )));
            }
            if section.max_items == 0 {
                return Err(ScoringError::Configuration(format!(
                    "section {} must allow at least one item",
                    section.name
                )));
            }
            if let Some(min) = section.min_score {
                if !(0.0..=100.0).contains(&min) {
                    return Err(ScoringError::Configuration(format!(
                        "section {} min_score {} outside [0, 100]",
                        section.name, min
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A scored job eligible for placement
#[derive(Debug, Clone)]
pub struct RankingCandidate {
    pub result: Arc<ScoreResult>,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub job_id: Uuid,
    pub section: String,
    /// 1-based position within the section
    pub position: usize,
    pub score: f64,
}

/// Score desc, then newer posting, then job id
fn by_score(a: &RankingCandidate, b: &RankingCandidate) -> Ordering {
    b.result
        .overall_score
        .total_cmp(&a.result.overall_score)
        .then(b.posted_at.cmp(&a.posted_at))
        .then(a.result.job_id.cmp(&b.result.job_id))
}

fn by_recency(a: &RankingCandidate, b: &RankingCandidate) -> Ordering {
    b.posted_at
        .cmp(&a.posted_at)
        .then(b.result.overall_score.total_cmp(&a.result.overall_score))
        .then(a.result.job_id.cmp(&b.result.job_id))
}

/// Places scored jobs into ordered sections; a job appears at most once
pub struct RankingAssembler {
    sections: Vec<SectionConfig>,
}

impl RankingAssembler {
    pub fn new(sections: Vec<SectionConfig>) -> Self {
        Self { sections }
    }

    /// Job ids any Pinned section asks for
    pub fn pinned_job_ids(&self) -> Vec<Uuid> {
        self.sections
            .iter()
            .filter_map(|s| match &s.rule {
                SelectionRule::Pinned { job_ids } => Some(job_ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn assemble(&self, candidates: Vec<RankingCandidate>) -> Vec<RankedEntry> {
        // One candidate per job, keeping the highest score
        let mut unique: HashMap<Uuid, RankingCandidate> = HashMap::new();
        for candidate in candidates {
            match unique.get(&candidate.result.job_id) {
                Some(existing) if by_score(existing, &candidate) != Ordering::Greater => {}
                _ => {
                    unique.insert(candidate.result.job_id, candidate);
                }
            }
        }
        let mut pool: Vec<RankingCandidate> = unique.into_values().collect();
        pool.sort_by(by_score);

        let mut assigned: HashSet<Uuid> = HashSet::new();
        let mut entries = Vec::new();

        for section in &self.sections {
            let eligible: Vec<&RankingCandidate> = pool
                .iter()
                .filter(|c| !assigned.contains(&c.result.job_id))
                .filter(|c| {
                    section
                        .min_score
                        .map_or(true, |min| c.result.overall_score >= min)
                })
                .collect();

            let mut chosen: Vec<&RankingCandidate> = match &section.rule {
                SelectionRule::HighestScore => {
                    eligible.into_iter().take(section.max_items).collect()
                }
                SelectionRule::MostRecent => {
                    let mut recent = eligible;
                    recent.sort_by(|a, b| by_recency(a, b));
                    recent.truncate(section.max_items);
                    recent
                }
                SelectionRule::Pinned { job_ids } => {
                    let pinned: HashSet<&Uuid> = job_ids.iter().collect();
                    eligible
                        .into_iter()
                        .filter(|c| pinned.contains(&c.result.job_id))
                        .take(section.max_items)
                        .collect()
                }
            };
            chosen.sort_by(|a, b| by_score(a, b));

            for (i, candidate) in chosen.into_iter().enumerate() {
                assigned.insert(candidate.result.job_id);
                entries.push(RankedEntry {
                    job_id: candidate.result.job_id,
                    section: section.name.clone(),
                    position: i + 1,
                    score: candidate.result.overall_score,
                });
            }
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentScores, ScoreBreakdown, WeightsVersion};
    use chrono::Duration;

    fn candidate(score: f64, hours_ago: i64) -> RankingCandidate {
        candidate_for(Uuid::new_v4(), score, hours_ago)
    }

    fn candidate_for(job_id: Uuid, score: f64, hours_ago: i64) -> RankingCandidate {
        RankingCandidate {
            result: Arc::new(ScoreResult {
                user_id: Uuid::nil(),
                job_id,
                overall_score: score,
                components: ComponentScores::default(),
                breakdown: ScoreBreakdown::default(),
                confidence: 1.0,
                reasons: vec![],
                recommendations: vec![],
                weights_version: WeightsVersion::new("default", 1),
                computed_at: Utc::now(),
            }),
            posted_at: Utc::now() - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn test_job_appears_in_first_matching_section_only() {
        let assembler = RankingAssembler::new(vec![
            SectionConfig::new("top", 2, SelectionRule::HighestScore),
            SectionConfig::new("rest", 10, SelectionRule::HighestScore),
        ]);
        let candidates: Vec<RankingCandidate> =
            [90.0, 80.0, 70.0, 60.0].iter().map(|s| candidate(*s, 1)).collect();

        let entries = assembler.assemble(candidates);
        assert_eq!(entries.len(), 4);
        let unique: HashSet<Uuid> = entries.iter().map(|e| e.job_id).collect();
        assert_eq!(unique.len(), 4);

        let top: Vec<f64> = entries.iter().filter(|e| e.section == "top").map(|e| e.score).collect();
        assert_eq!(top, vec![90.0, 80.0]);
        let rest: Vec<f64> = entries.iter().filter(|e| e.section == "rest").map(|e| e.score).collect();
        assert_eq!(rest, vec![70.0, 60.0]);
    }

    #[test]
    fn test_ties_break_on_recency_then_id() {
        let assembler =
            RankingAssembler::new(vec![SectionConfig::new("all", 10, SelectionRule::HighestScore)]);
        let older = candidate(75.0, 48);
        let newer = candidate(75.0, 1);
        let newer_id = newer.result.job_id;

        let entries = assembler.assemble(vec![older, newer]);
        assert_eq!(entries[0].job_id, newer_id);
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[1].position, 2);

        let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let posted = candidate_for(ids[1], 50.0, 5);
        let same = RankingCandidate {
            result: Arc::new(ScoreResult {
                job_id: ids[0],
                ..(*posted.result).clone()
            }),
            posted_at: posted.posted_at,
        };
        let entries = assembler.assemble(vec![posted, same]);
        assert_eq!(entries[0].job_id, ids[0]);
    }

    #[test]
    fn test_most_recent_and_min_score_rules() {
        let assembler = RankingAssembler::new(vec![
            SectionConfig::new("strong", 5, SelectionRule::HighestScore).with_min_score(80.0),
            SectionConfig::new("fresh", 1, SelectionRule::MostRecent),
        ]);
        let strong = candidate(85.0, 30);
        let fresh = candidate(40.0, 1);
        let stale = candidate(60.0, 100);
        let (strong_id, fresh_id) = (strong.result.job_id, fresh.result.job_id);

        let entries = assembler.assemble(vec![strong, fresh, stale]);
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].job_id, entries[0].section.as_str()), (strong_id, "strong"));
        assert_eq!((entries[1].job_id, entries[1].section.as_str()), (fresh_id, "fresh"));
    }

    #[test]
    fn test_pinned_section_only_takes_listed_jobs() {
        let pinned = candidate(10.0, 1);
        let other = candidate(99.0, 1);
        let assembler = RankingAssembler::new(vec![
            SectionConfig::new(
                "featured",
                3,
                SelectionRule::Pinned {
                    job_ids: vec![pinned.result.job_id, Uuid::new_v4()],
                },
            ),
            SectionConfig::new("rest", 3, SelectionRule::HighestScore),
        ]);
        assert_eq!(assembler.pinned_job_ids().len(), 2);

        let pinned_id = pinned.result.job_id;
        let entries = assembler.assemble(vec![pinned, other]);
        assert_eq!(entries[0].job_id, pinned_id);
        assert_eq!(entries[0].section, "featured");
        assert_eq!(entries[1].section, "rest");
    }

    #[test]
    fn test_duplicate_candidates_collapse() {
        let job_id = Uuid::new_v4();
        let assembler =
            RankingAssembler::new(vec![SectionConfig::new("all", 10, SelectionRule::HighestScore)]);
        let entries = assembler.assemble(vec![
            candidate_for(job_id, 40.0, 1),
            candidate_for(job_id, 70.0, 1),
        ]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score, 70.0);
    }

    #[test]
    fn test_section_validation() {
        assert!(SectionConfig::validate_all(&SectionConfig::default_digest()).is_ok());
        assert!(SectionConfig::validate_all(&[]).is_err());

        let dup = vec![
            SectionConfig::new("a", 1, SelectionRule::HighestScore),
            SectionConfig::new("a", 1, SelectionRule::MostRecent),
        ];
        assert!(SectionConfig::validate_all(&dup).is_err());

        let empty = vec![SectionConfig::new("a", 0, SelectionRule::HighestScore)];
        assert!(SectionConfig::validate_all(&empty).is_err());
    }

    #[test]
    fn test_sections_parse_from_json() {
        let json = r#"[
            {"name": "featured", "max_items": 2, "rule": "pinned",
             "job_ids": ["00000000-0000-0000-0000-000000000001"]},
            {"name": "top", "max_items": 5, "rule": "highest_score", "min_score": 70.0}
        ]"#;
        let sections: Vec<SectionConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(sections.len(), 2);
        assert!(matches!(sections[0].rule, SelectionRule::Pinned { ref job_ids } if job_ids.len() == 1));
        assert_eq!(sections[1].min_score, Some(70.0));
    }
}
