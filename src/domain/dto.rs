//! Data Transfer Objects for API requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::{RunPhase, RunRecord, SyncSummary};
use super::sidecar::SidecarStatus;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response code (0 = success, non-zero = error).
    pub code: i32,

    /// Human-readable message.
    pub message: String,

    /// Response data (null on error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create a success response.
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

/// Body of a successful `POST /run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStarted {
    /// Always true here; busy triggers are answered with an error body.
    pub started: bool,
    /// Identifier of the new run.
    pub run_id: Uuid,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// A run currently holds the run slot.
    pub running: bool,
    /// Phase of the latest run, if any.
    pub phase: Option<RunPhase>,
    /// Identifier of the latest run.
    pub run_id: Option<Uuid>,
    /// Exit code of the latest finished run.
    pub last_exit_code: Option<i32>,
    /// Start time of the latest run.
    pub last_started_at: Option<DateTime<Utc>>,
    /// Finish time of the latest run.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Keys requested by the latest run.
    pub keys_requested: Option<u32>,
    /// Keys produced by the latest run.
    pub keys_produced: Option<u32>,
    /// Failure message of the latest run.
    pub error: Option<String>,
    /// Advisory sync counts of the latest run.
    pub sync: Option<SyncSummary>,
    /// Live log output while a run is active, else the latest run's tail.
    pub log_tail: String,
    /// gpt-load sidecar state, when a sidecar is supervised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_load: Option<SidecarStatus>,
}

impl StatusResponse {
    /// Build a status body from the latest run, if any.
    ///
    /// `live_tail` is shown while a run is active or before the first run.
    #[must_use]
    pub fn new(record: Option<&RunRecord>, live_tail: String) -> Self {
        let log_tail = match record {
            Some(r) if !r.is_running() => r.log_tail.clone(),
            _ => live_tail,
        };
        Self {
            running: record.is_some_and(RunRecord::is_running),
            phase: record.map(|r| r.phase),
            run_id: record.map(|r| r.id),
            last_exit_code: record.and_then(|r| r.exit_code),
            last_started_at: record.map(|r| r.started_at),
            last_finished_at: record.and_then(|r| r.finished_at),
            keys_requested: record.map(|r| r.keys_requested),
            keys_produced: record.map(|r| r.keys_produced),
            error: record.and_then(|r| r.error.clone()),
            sync: record.map(|r| r.sync),
            log_tail,
            gpt_load: None,
        }
    }

    /// Attach the sidecar state.
    #[must_use]
    pub fn with_sidecar(mut self, status: Option<SidecarStatus>) -> Self {
        self.gpt_load = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_without_runs() {
        let status = StatusResponse::new(None, String::new());
        assert!(!status.running);
        assert!(status.last_exit_code.is_none());
    }

    #[test]
    fn test_status_from_running_record() {
        let record = RunRecord::start(3);
        let status = StatusResponse::new(Some(&record), "tail".to_string());
        assert!(status.running);
        assert_eq!(status.keys_requested, Some(3));
        assert_eq!(status.run_id, Some(record.id));
        assert_eq!(status.log_tail, "tail");
    }

    #[test]
    fn test_status_of_finished_run_shows_its_own_tail() {
        let mut record = RunRecord::start(1);
        record.finish(0, None, "run output\n".to_string());

        let status = StatusResponse::new(Some(&record), "server noise\n".to_string());
        assert!(!status.running);
        assert_eq!(status.log_tail, "run output\n");
        assert!(status.gpt_load.is_none());
    }
}
