//! Generated key records.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every key name created by this tool.
pub const KEY_NAME_PREFIX: &str = "lc-";

/// A freshly created LongCat API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedKey {
    /// Opaque secret returned by the platform.
    pub token: String,
    /// Display name given at creation time.
    pub name: String,
    /// Mailbox address of the owning account.
    pub email: String,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Run that produced the key.
    pub run_id: Uuid,
}

/// Result of the optional quota request for a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaOutcome {
    /// `None` when no request was attempted.
    pub applied: Option<bool>,
    /// When the request was confirmed.
    pub applied_at: Option<DateTime<Utc>>,
    /// Failure reason, if any.
    pub error: Option<String>,
}

impl QuotaOutcome {
    /// Quota request confirmed now.
    #[must_use]
    pub fn applied() -> Self {
        Self {
            applied: Some(true),
            applied_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Quota request attempted and failed.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            applied: Some(false),
            applied_at: None,
            error: Some(reason.into()),
        }
    }
}

/// One persisted row: the key and what happened to its quota request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// The generated key.
    pub key: GeneratedKey,
    /// Quota request outcome.
    pub quota: QuotaOutcome,
}

/// CSV row layout of a [`KeyRecord`].
#[derive(Debug, Serialize)]
pub struct KeyCsvRow<'a> {
    email: &'a str,
    api_key_name: &'a str,
    api_key: &'a str,
    created_at: String,
    quota_applied: &'static str,
    quota_applied_at: String,
    quota_apply_error: &'a str,
    run_id: String,
}

impl KeyRecord {
    /// Borrow this record as a CSV row.
    #[must_use]
    pub fn csv_row(&self) -> KeyCsvRow<'_> {
        KeyCsvRow {
            email: &self.key.email,
            api_key_name: &self.key.name,
            api_key: &self.key.token,
            created_at: self.key.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            quota_applied: match self.quota.applied {
                Some(true) => "1",
                Some(false) => "0",
                None => "",
            },
            quota_applied_at: self
                .quota
                .applied_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            quota_apply_error: self.quota.error.as_deref().unwrap_or_default(),
            run_id: self.key.run_id.to_string(),
        }
    }
}

/// Random key name: `lc-` followed by six lowercase alphanumerics.
#[must_use]
pub fn random_key_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{KEY_NAME_PREFIX}{suffix}")
}

/// Key shortened to `abcd...wxyz` for logs; short keys are fully masked.
#[must_use]
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
