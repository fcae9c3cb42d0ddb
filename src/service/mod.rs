//! Service layer module.
//!
//! Runs the key workflow behind a one-at-a-time gate, schedules runs,
//! supervises an optional local gpt-load and keeps the log tail shown by the
//! HTTP shim.

pub mod logtail;
pub mod runner;
pub mod scheduler;
pub mod sidecar;
pub mod smoke;
pub mod workflow;

pub use logtail::LogTail;
pub use runner::{JobRunner, RunView};
pub use scheduler::SchedulePlan;
pub use sidecar::Sidecar;
pub use smoke::{SmokeClient, SmokeReport};
pub use workflow::{KeyWorkflow, WorkflowSettings};
