//! Supervised gpt-load process state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the gpt-load sidecar reported by `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarStatus {
    /// Process is alive.
    pub running: bool,
    /// Process id of the live process.
    pub pid: Option<u32>,
    /// Address the sidecar listens on.
    pub base_url: String,
    /// Last successful start.
    pub started_at: Option<DateTime<Utc>>,
    /// Restarts performed by the watchdog.
    pub restart_count: u32,
    /// Exit code of the last process that ended.
    pub last_exit_code: Option<i32>,
    /// Error from the last failed spawn.
    pub last_start_error: Option<String>,
    /// Last health check answered below 500.
    pub last_healthy_at: Option<DateTime<Utc>>,
    /// `sqlite`, the DSN scheme, or `dsn`.
    pub database_mode: String,
    /// Recent sidecar output.
    pub log_tail: String,
}
