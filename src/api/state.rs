//! Application state for Axum handlers.

use std::sync::Arc;

use crate::service::{JobRunner, LogTail, Sidecar};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Gate around the key workflow.
    pub runner: Arc<JobRunner>,
    /// Recent log output.
    pub log_tail: LogTail,
    /// Supervised local gpt-load, when enabled.
    pub sidecar: Option<Arc<Sidecar>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(runner: Arc<JobRunner>, log_tail: LogTail) -> Self {
        Self {
            runner,
            log_tail,
            sidecar: None,
        }
    }

    /// Report `sidecar` in `/status`.
    #[must_use]
    pub fn with_sidecar(mut self, sidecar: Option<Arc<Sidecar>>) -> Self {
        self.sidecar = sidecar;
        self
    }
}
