//! API layer module.
//!
//! The small HTTP shim around the job runner: a status page, the log tail,
//! the run trigger and a health probe.

pub mod handlers;
pub mod router;
pub mod state;

pub use router::create_router;
pub use state::AppState;
