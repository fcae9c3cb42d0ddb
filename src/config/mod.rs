//! Configuration management module.
//!
//! Supports loading configuration from:
//! - `config.toml` (falls back to `config.toml.example`, or `KEYGEN_CONFIG`)
//! - Environment variables with `KEYGEN__<SECTION>__<KEY>` pattern
//! - A fixed set of well-known variables (`PORT`, `GPT_LOAD_AUTH_KEY`, ...)

mod automation;
mod mail;
mod server;
mod sidecar;
mod sync;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub use automation::{BrowserConfig, DEFAULT_PASSPORT_LOGIN_URL, LongcatConfig};
pub use mail::{DuckMailConfig, EmailConfig, EmailProvider, GptMailConfig, VerificationConfig};
pub use server::ServerConfig;
pub use sidecar::SidecarConfig;
pub use sync::{DEFAULT_GPT_LOAD_BASE_URL, GptLoadConfig};

/// Minimum period between scheduled runs.
pub const MIN_SCHEDULE_SECONDS: u64 = 5;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub request: RequestConfig,

    /// OTP polling bounds.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Chromium launch and wait settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Mailbox provider selection.
    #[serde(default)]
    pub email: EmailConfig,

    /// GPTMail provider settings.
    #[serde(default)]
    pub gptmail: GptMailConfig,

    /// DuckMail provider settings.
    #[serde(default)]
    pub duckmail: DuckMailConfig,

    /// LongCat workflow settings.
    #[serde(default)]
    pub longcat: LongcatConfig,

    /// gpt-load sync settings.
    #[serde(default)]
    pub gpt_load: GptLoadConfig,

    /// Co-located gpt-load process.
    #[serde(default)]
    pub sidecar: SidecarConfig,

    /// Periodic run settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. `$KEYGEN_CONFIG`, else `config.toml`, else `config.toml.example`
    /// 2. Environment variables with `KEYGEN__` prefix
    /// 3. Well-known variables such as `GPT_LOAD_AUTH_KEY` or `PORT`
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let path = std::env::var("KEYGEN_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .or_else(default_config_file);

        Self::load_from(path.as_deref(), &EnvOverrides::from_env())
    }

    /// Load configuration from an explicit file plus overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn load_from(path: Option<&Path>, overrides: &EnvOverrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        // KEYGEN__LONGCAT__KEYS_COUNT=3 -> longcat.keys_count = 3
        builder = builder.add_source(
            Environment::with_prefix("KEYGEN")
                .separator("__")
                .try_parsing(true),
        );

        let mut app_config: Self = overrides.apply(builder)?.build()?.try_deserialize()?;
        app_config.gpt_load.resolve_base_url(&app_config.sidecar);
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("server.port cannot be 0".to_string()));
        }

        if self.longcat.keys_count == 0 {
            return Err(ConfigError::Message(
                "longcat.keys_count must be at least 1".to_string(),
            ));
        }

        if self.verification.timeout == 0 || self.verification.interval == 0 {
            return Err(ConfigError::Message(
                "verification.timeout and verification.interval must be positive".to_string(),
            ));
        }

        if self.request.timeout == 0 {
            return Err(ConfigError::Message(
                "request.timeout cannot be 0".to_string(),
            ));
        }

        if self.sidecar.enabled && self.sidecar.command.trim().is_empty() {
            return Err(ConfigError::Message(
                "sidecar.command cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the mailbox provider.
    ///
    /// An explicit provider wins; otherwise DuckMail is used when it has an
    /// API key, and GPTMail in every other case.
    #[must_use]
    pub fn email_provider(&self) -> EmailProvider {
        let name = self.email.provider.trim();
        if !name.is_empty() {
            return EmailProvider::parse(name).unwrap_or_default();
        }
        if self.duckmail.api_key.trim().is_empty() {
            EmailProvider::GptMail
        } else {
            EmailProvider::DuckMail
        }
    }

    /// Non-fatal problems worth logging once logging is up.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let name = self.email.provider.trim();
        if !name.is_empty() && EmailProvider::parse(name).is_none() {
            warnings.push(format!(
                "unknown email provider '{name}', falling back to gptmail"
            ));
        }

        if self.email_provider() == EmailProvider::GptMail && self.gptmail.api_key.trim().is_empty() {
            warnings.push("gptmail.api_key is empty; GPTMAIL_API_KEY is usually required".to_string());
        }

        if self.gpt_load.enabled && self.gpt_load.auth_key.trim().is_empty() {
            warnings.push("gpt_load.auth_key is empty; key sync is disabled".to_string());
        }

        if self.sidecar.enabled && self.sidecar.encryption_key.trim().is_empty() {
            warnings.push(
                "sidecar.encryption_key is empty; gpt-load stores keys unencrypted".to_string(),
            );
        }

        warnings
    }
}

fn default_config_file() -> Option<PathBuf> {
    ["config.toml", "config.toml.example"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Well-known environment variables layered over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// Capture overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build overrides from explicit pairs; blank values are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let vars = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let v = v.as_ref().trim();
                (!v.is_empty()).then(|| (k.into(), v.to_string()))
            })
            .collect();
        Self { vars }
    }

    fn first(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.vars.get(*n).map(String::as_str))
    }

    fn apply(
        &self,
        mut builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let strings: [(&str, &[&str]); 9] = [
            ("gptmail.api_key", &["GPTMAIL_API_KEY"]),
            ("gpt_load.base_url", &["GPT_LOAD_BASE_URL"]),
            ("gpt_load.group_name", &["GPT_LOAD_GROUP_NAME"]),
            ("gpt_load.auth_key", &["GPT_LOAD_AUTH_KEY"]),
            (
                "duckmail.api_key",
                &["duckmail_apikey", "DUCKMAIL_APIKEY", "DUCKMAIL_API_KEY"],
            ),
            ("duckmail.api_base", &["DUCKMAIL_API_BASE"]),
            ("email.provider", &["EMAIL_PROVIDER"]),
            (
                "sidecar.encryption_key",
                &["GPT_LOAD_ENCRYPTION_KEY", "ENCRYPTION_KEY"],
            ),
            (
                "sidecar.database_dsn",
                &["GPT_LOAD_DATABASE_DSN", "DATABASE_DSN"],
            ),
        ];
        for (key, names) in strings {
            if let Some(value) = self.first(names) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Some(port) = self.first(&["PORT"]) {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::Message(format!("PORT is not a valid port: {port}")))?;
            builder = builder.set_override("server.port", i64::from(port))?;
        }

        for (key, name) in [
            ("scheduler.auto_run_on_start", "AUTO_RUN_ON_START"),
            ("sidecar.enabled", "GPT_LOAD_SIDECAR"),
        ] {
            if let Some(flag) = self.first(&[name]) {
                builder = builder.set_override(key, parse_flag(flag))?;
            }
        }

        for (key, name) in [
            ("scheduler.run_every_seconds", "RUN_EVERY_SECONDS"),
            ("scheduler.run_every_minutes", "RUN_EVERY_MINUTES"),
            ("sidecar.startup_grace_s", "GPT_LOAD_STARTUP_GRACE_S"),
            ("sidecar.restart_cooldown_s", "GPT_LOAD_RESTART_COOLDOWN_S"),
        ] {
            if let Some(raw) = self.first(&[name]) {
                builder = builder.set_override(key, parse_number(raw).max(0))?;
            }
        }

        Ok(builder)
    }
}

/// Interpret `1/true/yes/y/on` as true; anything else is false.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Parse an integer, accepting decimal input like `"1.5"`; garbage is 0.
#[allow(clippy::cast_possible_truncation)]
fn parse_number(raw: &str) -> i64 {
    raw.trim().parse::<f64>().map_or(0, |v| v as i64)
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout: u64,

    /// User agent for API calls.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/135.0.0.0 Safari/537.36"
        .to_string()
}

impl RequestConfig {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Periodic run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Trigger one run shortly after startup.
    #[serde(default)]
    pub auto_run_on_start: bool,

    /// Run period in seconds; takes precedence over minutes. `<= 0` disables.
    #[serde(default)]
    pub run_every_seconds: i64,

    /// Run period in minutes. `<= 0` disables.
    #[serde(default)]
    pub run_every_minutes: i64,
}

impl SchedulerConfig {
    /// Effective period, clamped to [`MIN_SCHEDULE_SECONDS`].
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn period(&self) -> Option<Duration> {
        let seconds = if self.run_every_seconds > 0 {
            self.run_every_seconds
        } else if self.run_every_minutes > 0 {
            self.run_every_minutes.saturating_mul(60)
        } else {
            return None;
        };
        Some(Duration::from_secs((seconds as u64).max(MIN_SCHEDULE_SECONDS)))
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Bytes of recent log output kept in memory.
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,

    /// Bytes of the tail shown by `/status` and `/log`.
    #[serde(default = "default_log_tail_display_bytes")]
    pub log_tail_display_bytes: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

const fn default_log_tail_bytes() -> usize {
    24_000
}

const fn default_log_tail_display_bytes() -> usize {
    12_000
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_tail_bytes: default_log_tail_bytes(),
            log_tail_display_bytes: default_log_tail_display_bytes(),
        }
    }
}
