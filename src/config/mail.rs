//! Temporary mailbox configuration.

use serde::Deserialize;

/// Supported temporary email providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmailProvider {
    /// GPTMail (`mail.chatgpt.org.uk`).
    #[default]
    GptMail,
    /// DuckMail (mail.tm compatible API).
    DuckMail,
}

impl EmailProvider {
    /// Parse a provider name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gptmail" => Some(Self::GptMail),
            "duckmail" => Some(Self::DuckMail),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GptMail => write!(f, "gptmail"),
            Self::DuckMail => write!(f, "duckmail"),
        }
    }
}

/// `[email]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailConfig {
    /// Provider name; empty means "pick automatically".
    #[serde(default)]
    pub provider: String,
}

/// `[gptmail]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GptMailConfig {
    /// API base URL.
    #[serde(default = "default_gptmail_base")]
    pub api_base: String,

    /// API key sent as `X-API-Key`.
    #[serde(default)]
    pub api_key: String,

    /// Local-part prefix for generated addresses.
    #[serde(default)]
    pub prefix: String,

    /// Candidate domains; one is picked at random per address.
    #[serde(default)]
    pub domains: Vec<String>,
}

fn default_gptmail_base() -> String {
    "https://mail.chatgpt.org.uk".to_string()
}

impl Default for GptMailConfig {
    fn default() -> Self {
        Self {
            api_base: default_gptmail_base(),
            api_key: String::new(),
            prefix: String::new(),
            domains: Vec::new(),
        }
    }
}

/// `[duckmail]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DuckMailConfig {
    /// API base URL.
    #[serde(default = "default_duckmail_base")]
    pub api_base: String,

    /// Optional API key sent as `X-API-Key`.
    #[serde(default)]
    pub api_key: String,

    /// Local-part prefix for generated addresses.
    #[serde(default)]
    pub prefix: String,

    /// Candidate domains; when empty the provider's domain list is used.
    #[serde(default)]
    pub domains: Vec<String>,
}

fn default_duckmail_base() -> String {
    "https://api.duckmail.sbs".to_string()
}

impl Default for DuckMailConfig {
    fn default() -> Self {
        Self {
            api_base: default_duckmail_base(),
            api_key: String::new(),
            prefix: String::new(),
            domains: Vec::new(),
        }
    }
}

/// `[verification]` section: OTP polling bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Total time to wait for an OTP, in seconds.
    #[serde(default = "default_otp_timeout")]
    pub timeout: u64,

    /// Delay between inbox polls, in seconds.
    #[serde(default = "default_otp_interval")]
    pub interval: u64,
}

const fn default_otp_timeout() -> u64 {
    60
}

const fn default_otp_interval() -> u64 {
    3
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout: default_otp_timeout(),
            interval: default_otp_interval(),
        }
    }
}
