//! Co-located gpt-load process settings.

use std::time::Duration;

use serde::Deserialize;

/// `[sidecar]` section. Disabled unless `enabled = true` or `GPT_LOAD_SIDECAR`.
#[derive(Debug, Clone, Deserialize)]
pub struct SidecarConfig {
    /// Launch and supervise a local gpt-load.
    #[serde(default)]
    pub enabled: bool,

    /// Executable to launch.
    #[serde(default = "default_command")]
    pub command: String,

    /// Extra arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Listen host handed to the child as `HOST`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port handed to the child as `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds before the watchdog's first check.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_s: u64,

    /// Seconds between health checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_s: u64,

    /// Per-check HTTP timeout, in seconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_s: u64,

    /// Consecutive failed checks that trigger a restart.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds after a start during which failed checks are not counted.
    #[serde(default = "default_startup_grace")]
    pub startup_grace_s: u64,

    /// Minimum seconds between restarts.
    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_s: u64,

    /// Bytes of child output kept in memory.
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,

    /// `ENCRYPTION_KEY` for the child.
    #[serde(default)]
    pub encryption_key: String,

    /// `DATABASE_DSN` for the child; gpt-load falls back to SQLite when empty.
    #[serde(default)]
    pub database_dsn: String,
}

fn default_command() -> String {
    "gpt-load".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3001
}

const fn default_initial_delay() -> u64 {
    5
}

const fn default_check_interval() -> u64 {
    20
}

const fn default_check_timeout() -> u64 {
    3
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_startup_grace() -> u64 {
    25
}

const fn default_restart_cooldown() -> u64 {
    30
}

const fn default_log_tail_bytes() -> usize {
    8_000
}

impl SidecarConfig {
    /// Base URL of the local instance.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_s)
    }

    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_s)
    }

    #[must_use]
    pub const fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_s)
    }

    #[must_use]
    pub const fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_s)
    }

    #[must_use]
    pub const fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_s)
    }

    /// Storage backend named by the DSN, without credentials.
    ///
    /// `sqlite` when empty, the URL scheme for URL DSNs, else `dsn`.
    #[must_use]
    pub fn database_mode(&self) -> String {
        let dsn = self.database_dsn.trim();
        if dsn.is_empty() {
            return "sqlite".to_string();
        }
        match dsn.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => scheme.to_string(),
            _ => "dsn".to_string(),
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_command(),
            args: Vec::new(),
            host: default_host(),
            port: default_port(),
            initial_delay_s: default_initial_delay(),
            check_interval_s: default_check_interval(),
            check_timeout_s: default_check_timeout(),
            failure_threshold: default_failure_threshold(),
            startup_grace_s: default_startup_grace(),
            restart_cooldown_s: default_restart_cooldown(),
            log_tail_bytes: default_log_tail_bytes(),
            encryption_key: String::new(),
            database_dsn: String::new(),
        }
    }
}
