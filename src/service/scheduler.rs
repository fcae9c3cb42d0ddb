//! Auto-run on start and periodic triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::service::runner::JobRunner;

const FIRST_TICK_DELAY: Duration = Duration::from_secs(2);

/// What the scheduler will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Trigger once at startup.
    pub run_on_start: bool,
    /// Period between triggers, if periodic runs are enabled.
    pub every: Option<Duration>,
}

impl SchedulePlan {
    /// Plan from the `[scheduler]` section.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            run_on_start: config.auto_run_on_start,
            every: config.period(),
        }
    }

    /// Whether there is anything to schedule.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.run_on_start && self.every.is_none()
    }
}

/// Spawn the scheduler, or return `None` when nothing is scheduled.
#[must_use]
pub fn spawn(runner: Arc<JobRunner>, plan: SchedulePlan) -> Option<JoinHandle<()>> {
    if plan.is_idle() {
        return None;
    }
    tracing::info!(
        run_on_start = plan.run_on_start,
        every_s = plan.every.map(|d| d.as_secs()),
        "Scheduler enabled"
    );

    Some(tokio::spawn(async move {
        if plan.run_on_start {
            fire(&runner, "startup");
        }
        let Some(every) = plan.every else {
            return;
        };

        sleep(FIRST_TICK_DELAY).await;
        loop {
            fire(&runner, "interval");
            sleep(every).await;
        }
    }))
}

fn fire(runner: &JobRunner, reason: &str) {
    match runner.trigger() {
        Ok(run_id) => tracing::info!(%run_id, reason, "Scheduled run started"),
        Err(AppError::RunInProgress) => tracing::debug!(reason, "Run in progress, tick skipped"),
        Err(e) => tracing::warn!(reason, error = %e, "Scheduled trigger failed"),
    }
}
