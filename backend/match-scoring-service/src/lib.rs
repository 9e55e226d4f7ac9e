pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use db::{InMemoryStore, Repositories};
pub use error::{ApiErrorKind, Result, ScoringError};
pub use jobs::BatchOrchestrator;
pub use services::{RankedEntry, ScoringEngine};
