//! # LongCat Keygen
//!
//! Produces LongCat platform API keys by driving the passport OTP login in a
//! real Chromium, using throwaway mailboxes to receive the codes:
//!
//! - **Mailboxes**: GPTMail or DuckMail temporary addresses
//! - **Browser**: email + OTP login, key creation and the quota form over CDP
//! - **Key store**: append-only text and CSV files
//! - **Sync**: best-effort import of new keys into a gpt-load group
//! - **Sidecar**: optional supervised local gpt-load process
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Keygen Service                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌────────────┐  ┌─────────────┐  ┌───────────────┐  │
//! │  │ API Layer  │  │ JobRunner  │  │ KeyWorkflow │→ │ Mailbox       │  │
//! │  │ (Axum)     │→ │ Scheduler  │→ │             │→ │ Browser (CDP) │  │
//! │  └────────────┘  └────────────┘  └─────────────┘→ │ KeyStore      │  │
//! │                                        │          └───────────────┘  │
//! │                                        └──▶ SyncWorker ──▶ gpt-load   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod api;
pub mod browser;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod mail;
pub mod service;
pub mod storage;
pub mod sync;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::create_router;
use crate::api::state::AppState;
use crate::browser::ChromiumBackend;
use crate::config::AppConfig;
use crate::http::build_client;
use crate::mail::build_mailbox;
use crate::service::smoke::{DEFAULT_API_BASE, SmokeClient};
use crate::service::{
    JobRunner, KeyWorkflow, LogTail, SchedulePlan, Sidecar, WorkflowSettings, scheduler,
};
use crate::storage::{FileKeyStore, read_key_lines};
use crate::sync::{KeySync, KeySyncer, SyncWorker};

/// Environment variable holding the key checked by `smoke`.
pub const SMOKE_KEY_VAR: &str = "LONGCAT_API_KEY";

/// Exit code for commands that cannot start for lack of input.
pub const USAGE_EXIT_CODE: i32 = 2;

/// Longest wait for queued sync work when the server stops.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// A runner plus the background tasks feeding it.
pub struct Wiring {
    /// Gate around the workflow.
    pub runner: Arc<JobRunner>,
    /// Sync worker and outcome tracker, when sync is active.
    pub background: Vec<JoinHandle<()>>,
}

impl Wiring {
    /// Drop the runner and wait for queued sync work to drain.
    ///
    /// The worker only stops once no run holds the workflow any more.
    pub async fn finish(self) {
        drop(self.runner);
        for task in self.background {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }
    }
}

/// Build the mailbox, browser backend, key store and sync worker.
///
/// Runs copy `log_tail` into their records.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_runner(config: &AppConfig, log_tail: &LogTail) -> anyhow::Result<Wiring> {
    let http = build_client(&config.request)?;
    let mailbox = build_mailbox(config, http.clone());
    info!(provider = %mailbox.provider(), "Mailbox provider selected");

    let backend = Arc::new(ChromiumBackend::from_config(config));
    let store = Arc::new(FileKeyStore::from_config(&config.longcat));

    let mut background = Vec::new();
    let (sync, outcomes) = match KeySyncer::from_config(&config.gpt_load, http) {
        Some(syncer) => {
            info!(group = %config.gpt_load.group_name, "gpt-load sync enabled");
            let (handle, outcomes, worker) = SyncWorker::spawn(Arc::new(syncer));
            background.push(worker);
            (Some(handle), Some(outcomes))
        }
        None => {
            info!("gpt-load sync disabled");
            (None, None)
        }
    };

    let workflow = KeyWorkflow::new(
        backend,
        mailbox,
        store,
        sync,
        WorkflowSettings::from_config(config),
    );
    let runner = Arc::new(
        JobRunner::new(Arc::new(workflow), config.longcat.keys_count)
            .with_log_tail(log_tail.clone()),
    );
    if let Some(outcomes) = outcomes {
        background.push(runner.track_sync(outcomes));
    }

    Ok(Wiring { runner, background })
}

/// Run the HTTP server, scheduler and gpt-load sidecar until shutdown.
///
/// On shutdown the scheduler and sidecar are stopped first, then queued
/// sync work gets up to [`SHUTDOWN_DRAIN`] to finish.
///
/// # Errors
///
/// Returns an error if components cannot be built or the server fails to bind.
pub async fn serve(config: AppConfig, log_tail: LogTail) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting LongCat Keygen");

    let sidecar = Sidecar::from_config(&config, build_client(&config.request)?);
    let watchdog = sidecar.as_ref().map(|sidecar| {
        // Spawn errors are kept in the sidecar status; the watchdog retries.
        let _ = sidecar.start();
        sidecar.spawn_watchdog()
    });

    let wiring = build_runner(&config, &log_tail)?;
    let scheduler = scheduler::spawn(
        Arc::clone(&wiring.runner),
        SchedulePlan::from_config(&config.scheduler),
    );

    let state = AppState::new(Arc::clone(&wiring.runner), log_tail)
        .with_sidecar(sidecar.clone());
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for task in [scheduler, watchdog].into_iter().flatten() {
        task.abort();
        let _ = task.await;
    }
    if let Some(sidecar) = &sidecar {
        sidecar.shutdown().await;
    }
    if tokio::time::timeout(SHUTDOWN_DRAIN, wiring.finish())
        .await
        .is_err()
    {
        warn!(
            timeout_s = SHUTDOWN_DRAIN.as_secs(),
            "gpt-load sync still busy at shutdown; pending keys were not submitted"
        );
    }

    served?;
    info!("Server shutdown complete");
    Ok(())
}

/// Run the workflow once in the foreground and return its exit code.
///
/// The printed record includes the outcome of the run's gpt-load sync.
///
/// # Errors
///
/// Returns an error if components cannot be built.
pub async fn run_once(
    config: &AppConfig,
    count: Option<u32>,
    log_tail: &LogTail,
) -> anyhow::Result<i32> {
    let wiring = build_runner(config, log_tail)?;
    let count = count.unwrap_or(config.longcat.keys_count).max(1);

    let (_, handle) = wiring.runner.start(count)?;
    handle.await?;

    let view = wiring.runner.view();
    wiring.finish().await;

    let Some(record) = view.latest() else {
        return Ok(service::runner::PANIC_EXIT_CODE);
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(record.exit_code.unwrap_or(service::runner::PANIC_EXIT_CODE))
}

/// Import the keys listed in `keys_file` (or the configured one) into gpt-load.
///
/// # Errors
///
/// Returns an error if the key file or the HTTP client cannot be set up.
pub async fn sync_file(config: &AppConfig, keys_file: Option<&Path>) -> anyhow::Result<i32> {
    let path = keys_file.unwrap_or(&config.longcat.keys_file);
    let keys = read_key_lines(path).await?;
    info!(path = %path.display(), count = keys.len(), "Keys loaded for sync");

    let http = build_client(&config.request)?;
    let Some(syncer) = KeySyncer::from_config(&config.gpt_load, http) else {
        warn!("gpt-load sync is disabled or has no auth key; nothing to do");
        return Ok(0);
    };

    match syncer.sync_keys(&keys).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(i32::from(report.error.is_some()))
        }
        Err(e) => {
            warn!(error = %e, code = e.error_code().as_i32(), "gpt-load sync failed");
            Ok(1)
        }
    }
}

/// Check the key in [`SMOKE_KEY_VAR`] with one chat completion.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn smoke(config: &AppConfig, model: &str, prompt: &str) -> anyhow::Result<i32> {
    let key = std::env::var(SMOKE_KEY_VAR).unwrap_or_default();
    let key = key.trim();
    if key.is_empty() {
        warn!("{SMOKE_KEY_VAR} is not set");
        return Ok(USAGE_EXIT_CODE);
    }

    let client = SmokeClient::new(build_client(&config.request)?, DEFAULT_API_BASE);
    match client.check(key, model, prompt).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(i32::from(!report.ok))
        }
        Err(e) => {
            warn!(error = %e, "Smoke request failed");
            Ok(e.exit_code())
        }
    }
}

/// Initialize logging and return the in-memory tail fed by it.
///
/// `RUST_LOG` wins over `[observability] log_level`.
#[must_use]
pub fn init_logging(config: &AppConfig) -> LogTail {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let log_tail = LogTail::new(
        config.observability.log_tail_bytes,
        config.observability.log_tail_display_bytes,
    );
    let tail_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(log_tail.clone());

    let subscriber = tracing_subscriber::registry().with(filter).with(tail_layer);

    if config.observability.log_format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    for warning in config.warnings() {
        warn!("{warning}");
    }

    log_tail
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::workflow::testing::{FakeBackend, FakeMailbox, MemoryStore, fast_settings};
    use crate::sync::{SyncReport, SyncWorker};

    struct SlowSync;

    #[async_trait::async_trait]
    impl KeySync for SlowSync {
        async fn sync_keys(&self, keys: &[String]) -> crate::error::SyncResult<SyncReport> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(SyncReport {
                sent: keys.len(),
                confirmed: true,
                ..SyncReport::default()
            })
        }
    }

    #[tokio::test]
    async fn test_finish_waits_for_queued_sync() {
        let (handle, outcomes, worker) = SyncWorker::spawn(Arc::new(SlowSync));
        let workflow = KeyWorkflow::new(
            Arc::new(FakeBackend::default()),
            Arc::new(FakeMailbox::default()),
            Arc::new(MemoryStore::default()),
            Some(handle),
            fast_settings(false),
        );
        let runner = Arc::new(JobRunner::new(Arc::new(workflow), 3));
        let tracker = runner.track_sync(outcomes);
        let wiring = Wiring {
            runner,
            background: vec![worker, tracker],
        };

        let (_, run) = wiring.runner.start(3).unwrap();
        run.await.unwrap();
        let view = wiring.runner.view();

        tokio::time::timeout(SHUTDOWN_DRAIN, wiring.finish())
            .await
            .unwrap();
        let record = view.latest().unwrap();
        assert_eq!(record.keys_produced, 3);
        assert_eq!(record.sync.submitted, 3);
    }
}
