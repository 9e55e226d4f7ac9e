pub mod cache;
pub mod components;
pub mod composite;
pub mod engine;
pub mod ranking;

pub use cache::{CacheKey, CacheStats, Freshness, ScoreCache};
pub use composite::{CompositeScorer, ScoringInputs};
pub use engine::{EngineSettings, ScoringEngine, UserContext};
pub use ranking::{RankedEntry, RankingAssembler, RankingCandidate, SectionConfig, SelectionRule};
