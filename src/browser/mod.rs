//! Browser automation against the MyKeeta passport and longcat.chat.
//!
//! The workflow only sees the capability traits below; [`ChromiumBackend`]
//! implements them with a real Chromium over CDP.
//!
//! ```text
//! AutomationBackend::open_session()
//!        │
//!        ▼
//! AutomationSession ── LoginFlow::login(address, mailbox, otp)
//!                   ── KeyCreationFlow::create_key(name)
//!                   ── KeyCreationFlow::apply_quota(name, ..)
//!                   ── close()
//! ```

pub mod longcat;
pub mod quota;
pub mod scripts;
pub mod session;

use async_trait::async_trait;

use crate::config::{AppConfig, BrowserConfig};
use crate::domain::QuotaOutcome;
use crate::error::WorkflowResult;
use crate::mail::{MailAddress, Mailbox, OtpPolicy};

pub use longcat::LongcatSession;
pub use session::ChromeSession;

/// Sign in with a mailbox OTP.
#[async_trait]
pub trait LoginFlow: Send {
    /// Log in as `address`, reading the OTP from `mailbox`.
    async fn login(
        &mut self,
        address: &MailAddress,
        mailbox: &dyn Mailbox,
        otp: OtpPolicy,
    ) -> WorkflowResult<()>;
}

/// Create keys in a signed-in session.
#[async_trait]
pub trait KeyCreationFlow: Send {
    /// Create a key named `name` and return its secret.
    async fn create_key(&mut self, name: &str) -> WorkflowResult<String>;

    /// Request more quota for `name`. Never fails the run.
    async fn apply_quota(&mut self, name: &str, industry: &str, scenario: &str) -> QuotaOutcome;
}

/// One browser session, used for exactly one account.
#[async_trait]
pub trait AutomationSession: LoginFlow + KeyCreationFlow {
    /// Release the browser.
    async fn close(&mut self);
}

/// Opens automation sessions.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Launch a fresh session.
    async fn open_session(&self) -> WorkflowResult<Box<dyn AutomationSession>>;
}

/// Chromium-backed sessions.
#[derive(Debug, Clone)]
pub struct ChromiumBackend {
    browser: BrowserConfig,
    login_url: String,
}

impl ChromiumBackend {
    /// Create a backend.
    #[must_use]
    pub fn new(browser: BrowserConfig, login_url: impl Into<String>) -> Self {
        Self {
            browser,
            login_url: login_url.into(),
        }
    }

    /// Backend from the `[browser]` and `[longcat]` sections.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.browser.clone(), config.longcat.login_url())
    }
}

#[async_trait]
impl AutomationBackend for ChromiumBackend {
    async fn open_session(&self) -> WorkflowResult<Box<dyn AutomationSession>> {
        let chrome = ChromeSession::launch(&self.browser).await?;
        Ok(Box::new(LongcatSession::new(chrome, &self.login_url, &self.browser)))
    }
}
