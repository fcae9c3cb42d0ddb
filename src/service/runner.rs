//! One-run-at-a-time job runner.
//!
//! The run slot holds the current or most recent [`RunRecord`]. A trigger
//! succeeds only when the slot is empty or holds a finished record. The log
//! tail is cleared when a run starts and copied into its record at the end.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::RunRecord;
use crate::error::{AppError, Result};
use crate::service::logtail::LogTail;
use crate::service::workflow::KeyWorkflow;
use crate::sync::SyncOutcome;

/// Exit code recorded when the run task itself dies.
pub const PANIC_EXIT_CODE: i32 = 1;

type RunSlot = Arc<Mutex<Option<RunRecord>>>;

/// Read access to the run slot that outlives the runner.
#[derive(Debug, Clone)]
pub struct RunView {
    slot: RunSlot,
}

impl RunView {
    /// Snapshot of the current or most recent run.
    #[must_use]
    pub fn latest(&self) -> Option<RunRecord> {
        self.slot.lock().clone()
    }
}

/// Starts workflow runs and tracks their state.
pub struct JobRunner {
    workflow: Arc<KeyWorkflow>,
    keys_count: u32,
    slot: RunSlot,
    log_tail: LogTail,
}

impl JobRunner {
    /// Create a runner producing `keys_count` keys per triggered run.
    #[must_use]
    pub fn new(workflow: Arc<KeyWorkflow>, keys_count: u32) -> Self {
        Self {
            workflow,
            keys_count: keys_count.max(1),
            slot: Arc::new(Mutex::new(None)),
            log_tail: LogTail::default(),
        }
    }

    /// Capture run output from `log_tail` (the one fed by logging).
    #[must_use]
    pub fn with_log_tail(mut self, log_tail: LogTail) -> Self {
        self.log_tail = log_tail;
        self
    }

    /// Start a run with the configured key count.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RunInProgress`] while another run is active.
    pub fn trigger(&self) -> Result<Uuid> {
        self.start(self.keys_count).map(|(id, _)| id)
    }

    /// Start a run producing `count` keys; the handle resolves when it ends.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RunInProgress`] while another run is active.
    pub fn start(&self, count: u32) -> Result<(Uuid, JoinHandle<()>)> {
        let run_id = {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(RunRecord::is_running) {
                return Err(AppError::RunInProgress);
            }
            let record = RunRecord::start(count);
            let id = record.id;
            *slot = Some(record);
            self.log_tail.clear();
            id
        };
        tracing::info!(%run_id, count, "Run started");

        let workflow = Arc::clone(&self.workflow);
        let slot = Arc::clone(&self.slot);
        let log_tail = self.log_tail.clone();
        let handle = tokio::spawn(async move {
            let progress_slot = Arc::clone(&slot);
            let task = tokio::spawn(async move {
                workflow
                    .run(run_id, count, move |produced| {
                        update(&progress_slot, run_id, |r| r.keys_produced = produced);
                    })
                    .await
            });

            let (exit_code, error) = match task.await {
                Ok(Ok(_)) => (0, None),
                Ok(Err(e)) => {
                    tracing::error!(
                        %run_id,
                        error_code = e.error_code().as_i32(),
                        category = %e.error_code().category(),
                        "Workflow aborted"
                    );
                    (e.exit_code(), Some(e.to_string()))
                }
                Err(e) => (PANIC_EXIT_CODE, Some(format!("run task failed: {e}"))),
            };

            match &error {
                None => tracing::info!(%run_id, exit_code, "Run finished"),
                Some(error) => tracing::error!(%run_id, exit_code, error = %error, "Run failed"),
            }
            let tail = log_tail.tail();
            update(&slot, run_id, |r| r.finish(exit_code, error, tail));
        });

        Ok((run_id, handle))
    }

    /// Whether a run currently holds the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(RunRecord::is_running)
    }

    /// Snapshot of the current or most recent run.
    #[must_use]
    pub fn latest(&self) -> Option<RunRecord> {
        self.slot.lock().clone()
    }

    /// Handle for reading run state after the runner is gone.
    #[must_use]
    pub fn view(&self) -> RunView {
        RunView {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Fold sync outcomes into the matching run's summary until the channel closes.
    pub fn track_sync(&self, mut outcomes: mpsc::UnboundedReceiver<SyncOutcome>) -> JoinHandle<()> {
        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.recv().await {
                update(&slot, outcome.run_id, |r| outcome.apply_to(&mut r.sync));
            }
        })
    }
}

/// Apply `f` to the slot's record if it still belongs to `run_id`.
fn update(slot: &RunSlot, run_id: Uuid, f: impl FnOnce(&mut RunRecord)) {
    let mut guard = slot.lock();
    match guard.as_mut() {
        Some(record) if record.id == run_id => f(record),
        _ => tracing::debug!(%run_id, "Run record replaced, update dropped"),
    }
}
