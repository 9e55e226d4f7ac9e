//! Component calculators
//!
//! Each calculator is a pure function of its inputs and the active weights
//! config, producing one 0-100 sub-score plus the signals behind it.

pub mod base_score;
pub mod geo_category;
pub mod personalization;

pub use base_score::{BaseScore, BaseScoreCalculator};
pub use geo_category::{GeoCategoryMatchCalculator, GeoCategoryScore};
pub use personalization::{
    select_neighbors, Neighbor, PersonalizationCalculator, PersonalizationScore, UserHistory,
};
