//! Domain models for the key generator.
//!
//! This module contains the generated key records, run state, sidecar state
//! and API contracts.

pub mod dto;
pub mod key;
pub mod run;
pub mod sidecar;

pub use dto::{ApiResponse, RunStarted, StatusResponse};
pub use key::{GeneratedKey, KeyRecord, QuotaOutcome, random_key_name, redact_key};
pub use run::{RunPhase, RunRecord, SyncSummary};
pub use sidecar::SidecarStatus;
