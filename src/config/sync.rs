//! gpt-load sync configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::SidecarConfig;

/// Hosted gpt-load used when no base URL is set and no sidecar runs.
pub const DEFAULT_GPT_LOAD_BASE_URL: &str = "https://great429gptload.zeabur.app";

/// `[gpt_load]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GptLoadConfig {
    /// Submit generated keys automatically.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// gpt-load base URL. Empty means the sidecar when it is enabled,
    /// else [`DEFAULT_GPT_LOAD_BASE_URL`]; see [`GptLoadConfig::resolve_base_url`].
    #[serde(default)]
    pub base_url: String,

    /// Target group name (`#` prefix optional).
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// Management API auth key.
    #[serde(default)]
    pub auth_key: String,

    /// Ignore the local ledger and always submit.
    #[serde(default)]
    pub force: bool,

    /// Poll the import task until it finishes.
    #[serde(default = "default_poll")]
    pub poll: bool,

    /// Poll deadline, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_s: f64,

    /// Poll interval, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: f64,

    /// Ledger of already-synced key hashes; derived from the group when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

const fn default_enabled() -> bool {
    true
}

fn default_group_name() -> String {
    "#pinhaofan".to_string()
}

const fn default_poll() -> bool {
    true
}

const fn default_poll_timeout() -> f64 {
    120.0
}

const fn default_poll_interval() -> f64 {
    1.0
}

impl GptLoadConfig {
    /// Sync runs only when enabled and an auth key is present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.auth_key.trim().is_empty()
    }

    /// Fill an empty base URL from the sidecar or the hosted default.
    pub fn resolve_base_url(&mut self, sidecar: &SidecarConfig) {
        if !self.base_url.trim().is_empty() {
            return;
        }
        self.base_url = if sidecar.enabled {
            sidecar.base_url()
        } else {
            DEFAULT_GPT_LOAD_BASE_URL.to_string()
        };
    }

    /// Poll deadline as a [`Duration`].
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_s.max(0.0))
    }

    /// Poll interval as a [`Duration`], never below 50ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s.max(0.05))
    }
}

impl Default for GptLoadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: String::new(),
            group_name: default_group_name(),
            auth_key: String::new(),
            force: false,
            poll: default_poll(),
            poll_timeout_s: default_poll_timeout(),
            poll_interval_s: default_poll_interval(),
            state_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_requires_auth_key() {
        let mut config = GptLoadConfig::default();
        assert!(!config.is_active());

        config.auth_key = "  ".to_string();
        assert!(!config.is_active());

        config.auth_key = "sk-admin".to_string();
        assert!(config.is_active());

        config.enabled = false;
        assert!(!config.is_active());
    }

    #[test]
    fn test_base_url_fallback() {
        let mut sidecar = SidecarConfig::default();

        let mut config = GptLoadConfig::default();
        config.resolve_base_url(&sidecar);
        assert_eq!(config.base_url, DEFAULT_GPT_LOAD_BASE_URL);

        sidecar.enabled = true;
        sidecar.port = 3100;
        let mut config = GptLoadConfig::default();
        config.resolve_base_url(&sidecar);
        assert_eq!(config.base_url, "http://127.0.0.1:3100");

        let mut config = GptLoadConfig {
            base_url: "http://pool.example".to_string(),
            ..Default::default()
        };
        config.resolve_base_url(&sidecar);
        assert_eq!(config.base_url, "http://pool.example");
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = GptLoadConfig {
            poll_interval_s: 0.0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }
}
