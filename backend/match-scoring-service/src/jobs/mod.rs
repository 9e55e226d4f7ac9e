// ============================================
// Background Jobs Module
// ============================================
//
// Contains the batch scoring orchestrator. Runs can be triggered via:
// - Command line (`match-scoring-service batch`)
// - An embedding service calling `BatchOrchestrator::start_batch`

pub mod batch;

pub use batch::BatchOrchestrator;
