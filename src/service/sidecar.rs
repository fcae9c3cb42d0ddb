//! Co-located gpt-load process with a health-check watchdog.
//!
//! The child is started with `HOST`, `PORT`, `AUTH_KEY`, `ENCRYPTION_KEY`
//! and `DATABASE_DSN` set, and its output is kept in a [`LogTail`]. The
//! watchdog GETs `/` every `check_interval_s`; any status below 500 counts as
//! healthy. After `failure_threshold` consecutive failures outside the startup
//! grace window the process is killed and started again, at most once per
//! `restart_cooldown_s`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SidecarConfig};
use crate::domain::SidecarStatus;
use crate::service::logtail::LogTail;

/// `AUTH_KEY` handed to gpt-load when no gpt-load auth key is configured.
pub const DEFAULT_SIDECAR_AUTH_KEY: &str = "change-me";

/// Counts consecutive failed checks.
#[derive(Debug, Clone, Copy)]
pub struct FailureCounter {
    threshold: u32,
    failures: u32,
}

impl FailureCounter {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: 0,
        }
    }

    /// Record one check. Returns true, and starts over, once `threshold`
    /// failures in a row have been seen.
    pub fn record(&mut self, ok: bool) -> bool {
        if ok {
            self.failures = 0;
            return false;
        }
        self.failures += 1;
        if self.failures >= self.threshold {
            self.failures = 0;
            return true;
        }
        false
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

/// Whether `last` is recent enough that another restart must wait.
fn cooling_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_some_and(|at| now.saturating_duration_since(at) < cooldown)
}

#[derive(Debug, Default)]
struct SidecarState {
    child: Option<Child>,
    pid: Option<u32>,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    last_restart: Option<Instant>,
    restart_count: u32,
    last_exit_code: Option<i32>,
    last_start_error: Option<String>,
    last_healthy_at: Option<DateTime<Utc>>,
}

impl SidecarState {
    /// Reap an exited child and report whether one is still alive.
    fn refresh(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(exit_code = status.code(), "gpt-load exited");
                self.last_exit_code = status.code();
                self.child = None;
                self.pid = None;
                false
            }
            Err(e) => {
                warn!(error = %e, "gpt-load status unavailable");
                false
            }
        }
    }
}

/// Supervisor for one gpt-load child process.
#[derive(Debug)]
pub struct Sidecar {
    config: SidecarConfig,
    auth_key: String,
    http: Client,
    state: Mutex<SidecarState>,
    log: LogTail,
}

impl Sidecar {
    /// Supervisor for `config`; `auth_key` is handed to the child as `AUTH_KEY`.
    #[must_use]
    pub fn new(config: SidecarConfig, auth_key: &str, http: Client) -> Self {
        let auth_key = auth_key.trim();
        let auth_key = if auth_key.is_empty() {
            DEFAULT_SIDECAR_AUTH_KEY
        } else {
            auth_key
        };
        let log = LogTail::new(config.log_tail_bytes, config.log_tail_bytes);
        Self {
            config,
            auth_key: auth_key.to_string(),
            http,
            state: Mutex::new(SidecarState::default()),
            log,
        }
    }

    /// Supervisor from `[sidecar]`, or `None` when it is disabled.
    #[must_use]
    pub fn from_config(config: &AppConfig, http: Client) -> Option<Arc<Self>> {
        config.sidecar.enabled.then(|| {
            Arc::new(Self::new(
                config.sidecar.clone(),
                &config.gpt_load.auth_key,
                http,
            ))
        })
    }

    /// Launch the child unless one is alive already.
    ///
    /// # Errors
    ///
    /// Returns the spawn error, which is also kept for [`Sidecar::status`].
    pub fn start(&self) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if state.refresh() {
            return Ok(());
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("HOST", &self.config.host)
            .env("PORT", self.config.port.to_string())
            .env("AUTH_KEY", &self.auth_key)
            .env("ENCRYPTION_KEY", self.config.encryption_key.trim())
            .env("DATABASE_DSN", self.config.database_dsn.trim())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %self.config.command, error = %e, "gpt-load failed to start");
                state.last_start_error = Some(e.to_string());
                return Err(e);
            }
        };

        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, self.log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, self.log.clone());
        }

        state.pid = child.id();
        state.child = Some(child);
        state.started = Some(Instant::now());
        state.started_at = Some(Utc::now());
        state.last_start_error = None;
        info!(
            pid = state.pid,
            base_url = %self.config.base_url(),
            db_mode = %self.config.database_mode(),
            "gpt-load started"
        );
        Ok(())
    }

    /// Whether the child is alive; records the exit code of one that ended.
    pub fn is_running(&self) -> bool {
        self.state.lock().refresh()
    }

    /// Whether the last start is within the startup grace window.
    #[must_use]
    pub fn in_grace(&self) -> bool {
        self.state
            .lock()
            .started
            .is_some_and(|at| at.elapsed() < self.config.startup_grace())
    }

    /// One health check: `GET /` answered with a status below 500.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/", self.config.base_url());
        let ok = match self
            .http
            .get(&url)
            .timeout(self.config.check_timeout())
            .send()
            .await
        {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(e) => {
                debug!(error = %e, "gpt-load health check failed");
                false
            }
        };
        if ok {
            self.state.lock().last_healthy_at = Some(Utc::now());
        }
        ok
    }

    /// Kill the child and start a new one. Returns false during the cooldown.
    pub async fn restart(&self, reason: &str) -> bool {
        let old = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if cooling_down(state.last_restart, self.config.restart_cooldown(), now) {
                debug!(reason, "gpt-load restart skipped during cooldown");
                return false;
            }
            state.last_restart = Some(now);
            state.pid = None;
            state.child.take()
        };

        if let Some(child) = old {
            self.stop_child(child).await;
        }

        warn!(reason, "Restarting gpt-load");
        self.log.push(&format!("[keygen] restarting gpt-load: {reason}\n"));
        self.state.lock().restart_count += 1;

        // A failed spawn is already recorded and logged by `start`.
        let _ = self.start();
        true
    }

    /// Stop the child, if any.
    pub async fn shutdown(&self) {
        let child = {
            let mut state = self.state.lock();
            state.pid = None;
            state.child.take()
        };
        if let Some(child) = child {
            info!("Stopping gpt-load");
            self.stop_child(child).await;
        }
    }

    async fn stop_child(&self, mut child: Child) {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "gpt-load kill failed");
        }
        if let Ok(Some(status)) = child.try_wait() {
            self.state.lock().last_exit_code = status.code();
        }
    }

    /// Snapshot for `/status`.
    #[must_use]
    pub fn status(&self) -> SidecarStatus {
        let mut state = self.state.lock();
        let running = state.refresh();
        SidecarStatus {
            running,
            pid: state.pid,
            base_url: self.config.base_url(),
            started_at: state.started_at,
            restart_count: state.restart_count,
            last_exit_code: state.last_exit_code,
            last_start_error: state.last_start_error.clone(),
            last_healthy_at: state.last_healthy_at,
            database_mode: self.config.database_mode(),
            log_tail: self.log.tail(),
        }
    }

    /// Spawn the health-check loop.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let sidecar = Arc::clone(self);
        tokio::spawn(async move {
            sleep(sidecar.config.initial_delay()).await;
            let threshold = sidecar.config.failure_threshold;
            let mut failures = FailureCounter::new(threshold);
            loop {
                let ok = sidecar.is_running() && sidecar.check_health().await;
                if !ok && sidecar.in_grace() {
                    debug!("gpt-load not ready within startup grace");
                } else if failures.record(ok) {
                    sidecar
                        .restart(&format!("health check failed {threshold}x"))
                        .await;
                }
                sleep(sidecar.config.check_interval()).await;
            }
        })
    }
}

fn pump_lines<R>(reader: R, log: LogTail)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.push(&line);
            log.push("\n");
        }
    });
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn config_for(command: &str, args: &[&str]) -> SidecarConfig {
        SidecarConfig {
            enabled: true,
            command: command.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            ..SidecarConfig::default()
        }
    }

    #[test]
    fn test_failure_counter() {
        let mut counter = FailureCounter::new(3);
        assert!(!counter.record(false));
        assert!(!counter.record(false));
        assert!(!counter.record(true));
        assert_eq!(counter.failures(), 0);

        assert!(!counter.record(false));
        assert!(!counter.record(false));
        assert!(counter.record(false));
        assert_eq!(counter.failures(), 0);

        let mut counter = FailureCounter::new(0);
        assert!(counter.record(false));
    }

    #[test]
    fn test_cooldown_window() {
        let now = Instant::now();
        let cooldown = Duration::from_secs(30);
        assert!(!cooling_down(None, cooldown, now));
        assert!(cooling_down(Some(now), cooldown, now));
        assert!(!cooling_down(
            Some(now),
            cooldown,
            now + Duration::from_secs(31)
        ));
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(Sidecar::from_config(&AppConfig::default(), Client::new()).is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_records_start_error() {
        let sidecar = Sidecar::new(
            config_for("/nonexistent/gpt-load", &[]),
            "",
            Client::new(),
        );
        assert!(sidecar.start().is_err());

        let status = sidecar.status();
        assert!(!status.running);
        assert!(status.pid.is_none());
        assert!(status.last_start_error.is_some());
        assert_eq!(status.base_url, "http://127.0.0.1:3001");
        assert_eq!(status.database_mode, "sqlite");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_captures_output_and_env() {
        let sidecar = Sidecar::new(
            config_for("sh", &["-c", "echo listening on $HOST:$PORT as $AUTH_KEY; sleep 5"]),
            "",
            Client::new(),
        );
        sidecar.start().unwrap();
        assert!(sidecar.is_running());
        assert!(sidecar.in_grace());

        // Starting again keeps the live process.
        let pid = sidecar.status().pid;
        sidecar.start().unwrap();
        assert_eq!(sidecar.status().pid, pid);

        for _ in 0..50 {
            if sidecar.status().log_tail.contains("listening") {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(
            sidecar
                .status()
                .log_tail
                .contains("listening on 127.0.0.1:3001 as change-me")
        );

        sidecar.shutdown().await;
        assert!(!sidecar.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_recorded() {
        let sidecar = Sidecar::new(config_for("sh", &["-c", "exit 7"]), "admin", Client::new());
        sidecar.start().unwrap();

        for _ in 0..50 {
            if !sidecar.is_running() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let status = sidecar.status();
        assert!(!status.running);
        assert_eq!(status.last_exit_code, Some(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_respects_cooldown() {
        let sidecar = Sidecar::new(config_for("sh", &["-c", "sleep 5"]), "admin", Client::new());
        sidecar.start().unwrap();
        let first_pid = sidecar.status().pid;

        assert!(sidecar.restart("health check failed 3x").await);
        let status = sidecar.status();
        assert!(status.running);
        assert_eq!(status.restart_count, 1);
        assert_ne!(status.pid, first_pid);
        assert!(status.log_tail.contains("restarting gpt-load: health check failed 3x"));

        assert!(!sidecar.restart("again").await);
        assert_eq!(sidecar.status().restart_count, 1);

        sidecar.shutdown().await;
    }

    fn sidecar_for(server: &MockServer) -> Sidecar {
        let address = server.address();
        Sidecar::new(
            SidecarConfig {
                host: address.ip().to_string(),
                port: address.port(),
                ..SidecarConfig::default()
            },
            "admin",
            Client::new(),
        )
    }

    #[tokio::test]
    async fn test_login_page_counts_as_healthy() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(401).body("login");
            })
            .await;

        let sidecar = sidecar_for(&server);
        assert!(sidecar.check_health().await);
        assert!(sidecar.status().last_healthy_at.is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_unhealthy() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(502);
            })
            .await;

        let sidecar = sidecar_for(&server);
        assert!(!sidecar.check_health().await);
        assert!(sidecar.status().last_healthy_at.is_none());
    }

    #[tokio::test]
    async fn test_health_check_fails_when_nothing_listens() {
        let sidecar = Sidecar::new(
            SidecarConfig {
                port: 1,
                check_timeout_s: 1,
                ..SidecarConfig::default()
            },
            "admin",
            Client::new(),
        );
        assert!(!sidecar.check_health().await);
        assert!(sidecar.status().last_healthy_at.is_none());
    }
}
