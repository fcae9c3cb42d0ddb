//! OTP extraction and bounded inbox polling.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::{Instant, sleep};

use crate::config::VerificationConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::mail::{MailAddress, Mailbox};

static OTP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Word boundaries keep timestamps and order numbers out.
    Regex::new(r"\b(\d{4,8})\b").expect("valid OTP pattern")
});

/// Inbox errors and progress are logged on the first poll and every this many after.
const LOG_EVERY: u32 = 5;

/// First standalone 4-8 digit run in `text`.
#[must_use]
pub fn extract_code(text: &str) -> Option<String> {
    OTP_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// First code found in any of `texts`, checked in order.
#[must_use]
pub fn first_code<'a>(texts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    texts.into_iter().find_map(extract_code)
}

/// Bounds for waiting on an OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    /// Total wait.
    pub timeout: Duration,
    /// Delay between polls.
    pub interval: Duration,
}

impl From<&VerificationConfig> for OtpPolicy {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout),
            interval: Duration::from_secs(config.interval.max(1)),
        }
    }
}

/// Outcome of one inbox check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxScan {
    /// Messages in the inbox.
    pub message_count: usize,
    /// Subject of the newest message, for progress logs.
    pub newest_subject: Option<String>,
    /// Code found, if any.
    pub code: Option<String>,
}

/// Poll `mailbox` until a code appears or `policy.timeout` elapses.
///
/// Inbox errors are logged and polling continues.
///
/// # Errors
///
/// Returns [`WorkflowError::ExpiredWait`] when no code arrives in time.
pub async fn poll_for_code<M>(
    mailbox: &M,
    address: &MailAddress,
    policy: OtpPolicy,
) -> WorkflowResult<String>
where
    M: Mailbox + ?Sized,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let noisy = attempt == 1 || attempt % LOG_EVERY == 0;

        match mailbox.check_inbox(address).await {
            Ok(InboxScan {
                code: Some(code), ..
            }) => {
                tracing::info!(
                    provider = %mailbox.provider(),
                    email = %address.email,
                    attempt,
                    "Verification code received"
                );
                return Ok(code);
            }
            Ok(scan) if noisy => {
                tracing::info!(
                    provider = %mailbox.provider(),
                    attempt,
                    messages = scan.message_count,
                    newest_subject = scan.newest_subject.as_deref().unwrap_or(""),
                    "Waiting for verification code"
                );
            }
            Ok(_) => {}
            Err(e) if noisy => {
                tracing::warn!(
                    provider = %mailbox.provider(),
                    attempt,
                    error = %e,
                    "Inbox poll failed"
                );
            }
            Err(_) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(policy.interval.min(deadline - now)).await;
    }

    Err(WorkflowError::ExpiredWait(format!(
        "verification code for {} ({}s)",
        address.email,
        policy.timeout.as_secs()
    )))
}
