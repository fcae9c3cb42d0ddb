//! Passport OTP login and key creation on longcat.chat.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use url::Url;

use super::scripts::{self, EMAIL_TARGET, OTP_TARGET};
use super::session::ChromeSession;
use super::{AutomationSession, KeyCreationFlow, LoginFlow};
use crate::config::BrowserConfig;
use crate::domain::QuotaOutcome;
use crate::error::{WorkflowError, WorkflowResult};
use crate::http::{parse_lenient_json, snippet, str_field};
use crate::mail::{MailAddress, Mailbox, OtpPolicy};

/// Landing page when the login URL carries no `backurl`.
pub const PROFILE_URL: &str = "https://longcat.chat/platform/profile";
/// API key management page.
pub const API_KEYS_URL: &str = "https://longcat.chat/platform/api_keys";
const HOME_URL: &str = "https://longcat.chat/";

const OTP_PAGE_WAIT: Duration = Duration::from_secs(15);
const PLATFORM_WAIT: Duration = Duration::from_secs(20);
const OTP_FILL_ATTEMPTS: u32 = 6;
const CREATE_KEY_ATTEMPTS: u32 = 4;

/// Decoded `backurl` query parameter of a passport login URL.
#[must_use]
pub fn backurl(login_url: &str) -> Option<String> {
    let url = Url::parse(login_url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "backurl")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether a response body is an HTML page instead of JSON.
#[must_use]
pub fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(256).collect::<String>().to_lowercase();
    head.contains("<html") || head.contains("<!doctype")
}

/// Whether a `user-current` payload describes a signed-in user.
#[must_use]
pub fn is_signed_in(payload: &Value) -> bool {
    if payload.get("code").and_then(Value::as_i64) != Some(0) {
        return false;
    }
    match payload.get("data") {
        None | Some(Value::Null | Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// Extract the key from a `create-apiKeys` response body.
///
/// # Errors
///
/// Returns a description of the rejection when `code != 0` or `data` is not
/// a non-empty string.
pub fn parse_create_key(text: &str) -> Result<String, String> {
    let body = parse_lenient_json(text)
        .map_err(|_| format!("create-apiKeys returned non-JSON: {}", snippet(text)))?;
    let code = body.get("code").and_then(Value::as_i64);
    let key = body.get("data").and_then(Value::as_str).map(str::trim).unwrap_or_default();
    if code == Some(0) && !key.is_empty() {
        return Ok(key.to_string());
    }
    let message = str_field(&body, "message");
    Err(format!(
        "create-apiKeys rejected: code={} message={}",
        code.map_or_else(|| "?".to_string(), |c| c.to_string()),
        if message.is_empty() { snippet(text) } else { message }
    ))
}

/// In-page fetch result.
#[derive(Debug, Default, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    text: String,
    #[serde(default)]
    error: Option<String>,
}

/// Browser session driving longcat.chat.
#[derive(Debug)]
pub struct LongcatSession {
    pub(super) chrome: ChromeSession,
    login_url: String,
    pub(super) short_wait: Duration,
}

impl LongcatSession {
    /// Wrap a launched browser.
    #[must_use]
    pub fn new(chrome: ChromeSession, login_url: &str, config: &BrowserConfig) -> Self {
        Self {
            chrome,
            login_url: login_url.to_string(),
            short_wait: Duration::from_secs(config.short_wait.max(1)),
        }
    }

    pub(super) async fn settle(&self) {
        self.chrome.wait_until(scripts::DOCUMENT_READY, self.short_wait).await;
    }

    async fn submit_email(&self, email: &str) -> WorkflowResult<()> {
        self.chrome.goto(&self.login_url).await?;
        self.settle().await;

        let continue_with_email = scripts::click_text(&["Continue with email", "Continue with Email"]);
        if !self.chrome.wait_until(&continue_with_email, self.short_wait).await {
            return Err(WorkflowError::Automation(
                "\"Continue with email\" not found on passport page".to_string(),
            ));
        }

        let mark_email = scripts::script(scripts::MARK_EMAIL_INPUT);
        if !self.chrome.wait_until(&mark_email, self.short_wait).await {
            return Err(WorkflowError::Automation("email input not found".to_string()));
        }
        self.chrome.type_into(EMAIL_TARGET, email).await?;

        let click_continue = scripts::script(scripts::CLICK_CONTINUE);
        if !self.chrome.wait_until(&click_continue, self.short_wait).await {
            return Err(WorkflowError::Automation("Continue button not found".to_string()));
        }

        if !self
            .chrome
            .wait_until(&scripts::has_text(&["Enter Verification Code"]), OTP_PAGE_WAIT)
            .await
        {
            return Err(WorkflowError::Automation(
                "verification code page did not appear".to_string(),
            ));
        }
        Ok(())
    }

    async fn fill_otp(&self, code: &str) -> WorkflowResult<()> {
        let set_otp = scripts::set_otp(code);
        let enabled = scripts::script(scripts::OTP_SUBMIT_ENABLED);
        let mark_box = scripts::script(scripts::MARK_FIRST_OTP_BOX);

        for attempt in 1..=OTP_FILL_ATTEMPTS {
            if self.chrome.check(&set_otp).await {
                sleep(Duration::from_millis(300)).await;
                if self.chrome.check(&enabled).await {
                    return Ok(());
                }
            }

            if self.chrome.check(&mark_box).await {
                if let Err(e) = self.chrome.type_into(OTP_TARGET, code).await {
                    tracing::debug!(attempt, error = %e, "Keyboard OTP entry failed");
                }
                sleep(Duration::from_millis(300)).await;
                if self.chrome.check(&enabled).await {
                    return Ok(());
                }
            }

            tracing::debug!(attempt, "OTP not accepted yet");
            sleep(Duration::from_millis(500)).await;
        }

        Err(WorkflowError::Automation(format!(
            "OTP boxes not accepted after {OTP_FILL_ATTEMPTS} attempts"
        )))
    }

    /// Follow the SSO hand-off until longcat.chat holds the session cookie.
    async fn finish_sso(&self) -> WorkflowResult<()> {
        let landed = self
            .chrome
            .wait_until(&scripts::url_contains("longcat.chat/platform"), PLATFORM_WAIT)
            .await;
        tracing::debug!(landed, "Passport redirect finished");

        let target = backurl(&self.login_url).unwrap_or_else(|| PROFILE_URL.to_string());
        self.chrome.goto(&target).await?;
        self.settle().await;

        if self.chrome.current_url().await.contains("longcat.chat/login") {
            tracing::info!("Landed on login page, retrying SSO exchange");
            self.chrome.goto(&target).await?;
            self.settle().await;
        }
        Ok(())
    }

    async fn signed_in(&self) -> bool {
        if !self.chrome.current_url().await.contains("longcat.chat") {
            if let Err(e) = self.chrome.goto(HOME_URL).await {
                tracing::warn!(error = %e, "Could not open longcat.chat");
                return false;
            }
            self.settle().await;
        }
        match self.chrome.eval_value(scripts::USER_CURRENT).await {
            Ok(payload) => is_signed_in(&payload),
            Err(e) => {
                tracing::warn!(error = %e, "user-current check failed");
                false
            }
        }
    }
}

#[async_trait]
impl LoginFlow for LongcatSession {
    async fn login(
        &mut self,
        address: &MailAddress,
        mailbox: &dyn Mailbox,
        otp: OtpPolicy,
    ) -> WorkflowResult<()> {
        tracing::info!(email = %address.email, "Starting passport login");
        self.submit_email(&address.email).await?;

        let code = mailbox.wait_for_code(address, otp).await?;
        self.fill_otp(&code).await?;

        let submit = scripts::script(scripts::CLICK_OTP_SUBMIT);
        if !self.chrome.wait_until(&submit, self.short_wait).await {
            return Err(WorkflowError::Automation("OTP submit button not clickable".to_string()));
        }

        self.finish_sso().await?;
        if !self.signed_in().await {
            return Err(WorkflowError::Automation(format!(
                "not signed in to longcat.chat after login (url: {})",
                self.chrome.current_url().await
            )));
        }
        tracing::info!(email = %address.email, "Signed in to longcat.chat");
        Ok(())
    }
}

#[async_trait]
impl KeyCreationFlow for LongcatSession {
    async fn create_key(&mut self, name: &str) -> WorkflowResult<String> {
        self.chrome.goto(API_KEYS_URL).await?;
        self.settle().await;

        let script = scripts::create_key(name);
        let mut last = String::new();
        for attempt in 1..=CREATE_KEY_ATTEMPTS {
            let response: FetchResponse = self.chrome.eval(&script).await?;
            if let Some(error) = response.error {
                return Err(WorkflowError::Network(format!("create-apiKeys request failed: {error}")));
            }
            if !looks_like_html(&response.text) {
                let token = parse_create_key(&response.text).map_err(WorkflowError::Automation)?;
                tracing::info!(name, "API key created");
                return Ok(token);
            }

            tracing::warn!(attempt, status = response.status, "create-apiKeys answered HTML, reloading");
            last = format!("HTTP {} {}", response.status, snippet(&response.text));
            self.chrome.reload().await?;
            self.settle().await;
            sleep(Duration::from_millis(600)).await;
        }

        Err(WorkflowError::Automation(format!(
            "create-apiKeys kept answering HTML: {last}"
        )))
    }

    async fn apply_quota(&mut self, name: &str, industry: &str, scenario: &str) -> QuotaOutcome {
        match self.request_quota(name, industry, scenario).await {
            Ok(()) => {
                tracing::info!(name, "Quota request submitted");
                QuotaOutcome::applied()
            }
            Err(reason) => {
                tracing::warn!(name, reason = %reason, "Quota request failed");
                QuotaOutcome::failed(reason)
            }
        }
    }
}

#[async_trait]
impl AutomationSession for LongcatSession {
    async fn close(&mut self) {
        self.chrome.close().await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::DEFAULT_PASSPORT_LOGIN_URL;

    #[test]
    fn test_backurl_is_decoded() {
        assert_eq!(
            backurl(DEFAULT_PASSPORT_LOGIN_URL).as_deref(),
            Some(
                "https://longcat.chat/api/v1/user-loginV3?url=https%3A%2F%2Flongcat.chat%2Fplatform%2Fprofile"
            )
        );
        assert_eq!(backurl("https://passport.example/login?x=1"), None);
        assert_eq!(backurl("not a url"), None);
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("  <!DOCTYPE html><html></html>"));
        assert!(looks_like_html("<html lang=\"zh\">"));
        assert!(!looks_like_html("{\"code\":0,\"data\":\"ak_1\"}"));
    }

    #[test]
    fn test_parse_create_key() {
        assert_eq!(
            parse_create_key(r#"{"code":0,"message":"ok","data":"ak_123"}"#),
            Ok("ak_123".to_string())
        );

        let err = parse_create_key(r#"{"code":4003,"message":"limit reached","data":null}"#)
            .unwrap_err();
        assert!(err.contains("4003"));
        assert!(err.contains("limit reached"));

        assert!(parse_create_key(r#"{"code":0,"data":""}"#).is_err());
        assert!(parse_create_key("oops").is_err());
    }

    #[test]
    fn test_is_signed_in() {
        assert!(is_signed_in(&json!({"code": 0, "data": {"userId": 1}})));
        assert!(!is_signed_in(&json!({"code": 0, "data": null})));
        assert!(!is_signed_in(&json!({"code": 401, "data": {"userId": 1}})));
        assert!(!is_signed_in(&Value::Null));
    }
}
