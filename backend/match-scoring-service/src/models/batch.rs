use super::weights::WeightsVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchMode {
    /// One user against the catalog (or an explicit job list)
    SingleUser {
        user_id: Uuid,
        job_ids: Option<Vec<Uuid>>,
    },
    /// Many users (all active users when `user_ids` is None), each against
    /// their candidate set
    BulkMultiUser {
        user_ids: Option<Vec<Uuid>>,
        candidates_per_user: Option<usize>,
    },
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::SingleUser { .. } => "single_user",
            BatchMode::BulkMultiUser { .. } => "bulk_multi_user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::PartiallyFailed => "partially_failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::PartiallyFailed
                | BatchStatus::Cancelled
        )
    }

    /// Allowed lifecycle edges
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, PartiallyFailed)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a run's progress counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    /// Retry attempts made (an item retried twice counts 2 here, once in its outcome)
    pub retried: u64,
    /// Items never dispatched because the run was cancelled
    pub cancelled: u64,
    pub pending: u64,
}

impl BatchProgress {
    pub fn failure_rate(&self) -> f64 {
        let settled = self.completed + self.failed;
        if settled == 0 {
            0.0
        } else {
            self.failed as f64 / settled as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemErrorSample {
    pub user_id: Uuid,
    pub job_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub counts_by_kind: BTreeMap<String, u64>,
    pub samples: Vec<ItemErrorSample>,
    /// Run-level error that made the run fail outright
    pub fatal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: Uuid,
    pub mode: BatchMode,
    pub status: BatchStatus,
    pub weights_version: WeightsVersion,
    pub progress: BatchProgress,
    pub error_summary: ErrorSummary,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(mode: BatchMode, weights_version: WeightsVersion) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            status: BatchStatus::Pending,
            weights_version,
            progress: BatchProgress::default(),
            error_summary: ErrorSummary::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn report(&self) -> BatchStatusReport {
        BatchStatusReport {
            run_id: self.id,
            status: self.status,
            progress: self.progress,
            error_summary: self.error_summary.clone(),
        }
    }
}

/// What `get_batch_status` hands back to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub run_id: Uuid,
    pub status: BatchStatus,
    pub progress: BatchProgress,
    pub error_summary: ErrorSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::PartiallyFailed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::Running.is_terminal());
        assert!(!BatchStatus::Cancelling.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(BatchStatus::Pending.can_transition_to(BatchStatus::Running));
        assert!(BatchStatus::Running.can_transition_to(BatchStatus::Cancelling));
        assert!(BatchStatus::Cancelling.can_transition_to(BatchStatus::Cancelled));
        assert!(!BatchStatus::Running.can_transition_to(BatchStatus::Cancelled));
        assert!(!BatchStatus::Completed.can_transition_to(BatchStatus::Running));
    }

    #[test]
    fn test_failure_rate() {
        let progress = BatchProgress {
            total: 100,
            completed: 90,
            failed: 10,
            ..Default::default()
        };
        assert!((progress.failure_rate() - 0.1).abs() < 1e-9);
        assert_eq!(BatchProgress::default().failure_rate(), 0.0);
    }
}
