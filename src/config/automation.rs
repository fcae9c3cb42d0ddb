//! Browser and LongCat workflow configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Default MyKeeta passport login URL for the LongCat theme.
pub const DEFAULT_PASSPORT_LOGIN_URL: &str = "https://passport.mykeeta.com/pc/login?\
locale=en&region=HK&joinkey=1101498_851697727&token_id=5oTEq210UBLUcm4tcuuy6A\
&service=consumer&risk_cost_id=119801&theme=longcat&cityId=810001&backurl=\
https%3A%2F%2Flongcat.chat%2Fapi%2Fv1%2Fuser-loginV3%3Furl%3Dhttps%253A%252F%252Flongcat.chat%252Fplatform%252Fprofile";

/// `[longcat]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LongcatConfig {
    /// Passport login URL; empty uses [`DEFAULT_PASSPORT_LOGIN_URL`].
    #[serde(default)]
    pub passport_login_url: String,

    /// Number of keys produced per run.
    #[serde(default = "default_keys_count")]
    pub keys_count: u32,

    /// Append-only plain-text key list.
    #[serde(default = "default_keys_file")]
    pub keys_file: PathBuf,

    /// Append-only CSV record log.
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,

    /// Submit the "apply for more quota" form after creating a key.
    #[serde(default = "default_apply_quota")]
    pub apply_quota: bool,

    /// Industry value for the quota form.
    #[serde(default = "default_quota_industry")]
    pub quota_industry: String,

    /// Usage scenario value for the quota form.
    #[serde(default = "default_quota_scenario")]
    pub quota_scenario: String,

    /// Upper bound of the random pause between two keys, in milliseconds.
    #[serde(default = "default_pause_ms")]
    pub pause_between_keys_ms: u64,
}

const fn default_keys_count() -> u32 {
    1
}

fn default_keys_file() -> PathBuf {
    PathBuf::from("temp/longcat_keys.txt")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("temp/longcat_keys.csv")
}

const fn default_apply_quota() -> bool {
    true
}

fn default_quota_industry() -> String {
    "Internet".to_string()
}

fn default_quota_scenario() -> String {
    "Chatbot".to_string()
}

const fn default_pause_ms() -> u64 {
    1500
}

impl LongcatConfig {
    /// Effective passport login URL.
    #[must_use]
    pub fn login_url(&self) -> &str {
        let url = self.passport_login_url.trim();
        if url.is_empty() {
            DEFAULT_PASSPORT_LOGIN_URL
        } else {
            url
        }
    }
}

impl Default for LongcatConfig {
    fn default() -> Self {
        Self {
            passport_login_url: String::new(),
            keys_count: default_keys_count(),
            keys_file: default_keys_file(),
            csv_path: default_csv_path(),
            apply_quota: default_apply_quota(),
            quota_industry: default_quota_industry(),
            quota_scenario: default_quota_scenario(),
            pause_between_keys_ms: default_pause_ms(),
        }
    }
}

/// `[browser]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Run Chromium headless.
    #[serde(default)]
    pub headless: bool,

    /// Explicit Chromium executable; auto-detected when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Bounded wait for page elements, in seconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,

    /// Short wait used for optional elements, in seconds.
    #[serde(default = "default_short_wait")]
    pub short_wait: u64,

    /// Launch attempts before giving up.
    #[serde(default = "default_launch_attempts")]
    pub launch_attempts: u32,
}

const fn default_wait_timeout() -> u64 {
    60
}

const fn default_short_wait() -> u64 {
    10
}

const fn default_launch_attempts() -> u32 {
    3
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            executable: None,
            wait_timeout: default_wait_timeout(),
            short_wait: default_short_wait(),
            launch_attempts: default_launch_attempts(),
        }
    }
}
