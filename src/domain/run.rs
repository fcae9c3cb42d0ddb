//! Run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// Workflow in progress.
    Running,
    /// All requested keys produced.
    Succeeded,
    /// Aborted by a workflow error.
    Failed,
}

impl RunPhase {
    /// Finished runs no longer hold the run slot.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Counts of advisory sync outcomes for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Keys sent to gpt-load.
    pub submitted: usize,
    /// Keys already present in the ledger.
    pub skipped: usize,
    /// Keys whose import failed or was not confirmed.
    pub failed: usize,
}

/// State of the current (or most recent) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub id: Uuid,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time, once finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current phase.
    pub phase: RunPhase,
    /// Exit code, once finished (0 on success).
    pub exit_code: Option<i32>,
    /// Keys asked for.
    pub keys_requested: u32,
    /// Keys persisted so far.
    pub keys_produced: u32,
    /// Failure message of a failed run.
    pub error: Option<String>,
    /// Sync outcomes reported so far.
    pub sync: SyncSummary,
    /// Log output captured when the run finished.
    #[serde(default)]
    pub log_tail: String,
}

impl RunRecord {
    /// Start a new running record.
    #[must_use]
    pub fn start(keys_requested: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Running,
            exit_code: None,
            keys_requested,
            keys_produced: 0,
            error: None,
            sync: SyncSummary::default(),
            log_tail: String::new(),
        }
    }

    /// Mark the record finished with an exit code and the run's log output.
    pub fn finish(&mut self, exit_code: i32, error: Option<String>, log_tail: String) {
        self.finished_at = Some(Utc::now());
        self.log_tail = log_tail;
        self.exit_code = Some(exit_code);
        self.phase = if exit_code == 0 {
            RunPhase::Succeeded
        } else {
            RunPhase::Failed
        };
        self.error = error;
    }

    /// Whether the run still holds the run slot.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        !self.phase.is_finished()
    }
}
