//! Best-effort "apply for more quota" request.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;

use super::longcat::{API_KEYS_URL, LongcatSession};
use super::scripts;

/// Pages that may carry the quota button, tried in order.
pub const USAGE_URLS: &[&str] = &[
    "https://longcat.chat/platform/usage",
    "https://longcat.chat/platform/usage-info",
    "https://longcat.chat/platform/billing",
    "https://longcat.chat/platform/quota",
];

/// Button labels, Chinese UI first.
pub const QUOTA_LABELS: &[&str] = &[
    "申请更多额度",
    "申请更多配额",
    "申请配额",
    "提额",
    "Request more quota",
    "Apply",
    "Quota",
    "Increase",
    "Request",
];

const SUCCESS_TOASTS: &[&str] = &["提交成功", "已提交"];
const KEY_LIST_REFRESHES: u32 = 3;
const FORM_OPEN_WAIT: Duration = Duration::from_secs(20);
const TOAST_WAIT: Duration = Duration::from_secs(4);
const FORM_CLOSE_WAIT: Duration = Duration::from_secs(12);

/// What the form filler reported.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResult {
    #[serde(default)]
    ok_industry: Option<bool>,
    #[serde(default)]
    ok_scenario: Option<bool>,
    #[serde(default)]
    agreed: Option<bool>,
    #[serde(default)]
    submitted: bool,
    #[serde(default)]
    submit_disabled: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl FormResult {
    /// Why the form was not submitted, if it was not.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if self.submitted {
            return None;
        }
        let reason = if self.ok_industry == Some(false) {
            "industry field not selected"
        } else if self.ok_scenario == Some(false) {
            "usage scenario field not found"
        } else if self.agreed == Some(false) {
            "agreement checkbox not ticked"
        } else if self.submit_disabled == Some(true) {
            "submit button disabled"
        } else {
            "submit button not found"
        };
        Some(reason.to_string())
    }
}

impl LongcatSession {
    /// Open the quota form, fill it and confirm submission.
    pub(super) async fn request_quota(
        &self,
        name: &str,
        industry: &str,
        scenario: &str,
    ) -> Result<(), String> {
        self.wait_for_key_listed(name).await;

        if !self.open_quota_form().await? {
            return Err("quota button not found".to_string());
        }

        let form: FormResult = self
            .chrome
            .eval(&scripts::fill_quota_form(industry, scenario))
            .await
            .map_err(|e| e.to_string())?;
        self.settle().await;
        if let Some(reason) = form.failure() {
            return Err(reason);
        }

        let confirmed = self.chrome.wait_until(&scripts::has_text(SUCCESS_TOASTS), TOAST_WAIT).await
            || self
                .chrome
                .wait_until(&scripts::script(scripts::QUOTA_FORM_CLOSED), FORM_CLOSE_WAIT)
                .await;
        if confirmed {
            Ok(())
        } else {
            Err("quota submit not confirmed".to_string())
        }
    }

    /// The new key may take a refresh or two to show up in the list.
    async fn wait_for_key_listed(&self, name: &str) {
        if let Err(e) = self.chrome.goto(API_KEYS_URL).await {
            tracing::debug!(error = %e, "Could not open key list");
            return;
        }
        let listed = scripts::has_text(&[name]);
        for _ in 0..KEY_LIST_REFRESHES {
            if self.chrome.wait_until(&listed, self.short_wait).await {
                return;
            }
            if self.chrome.reload().await.is_err() {
                return;
            }
        }
        tracing::debug!(name, "Key not visible in list, continuing");
    }

    /// Try each usage page until clicking a quota button opens the form.
    async fn open_quota_form(&self) -> Result<bool, String> {
        let click = scripts::click_quota_button(QUOTA_LABELS);
        for url in USAGE_URLS {
            if let Err(e) = self.chrome.goto(url).await {
                tracing::debug!(url, error = %e, "Usage page unreachable");
                continue;
            }
            self.settle().await;
            self.chrome.check(scripts::SCROLL_NUDGE).await;
            sleep(Duration::from_millis(400)).await;
            self.chrome.check(scripts::INSTALL_OPEN_TRAP).await;

            let before: u64 = self
                .chrome
                .eval(&scripts::script(scripts::DIALOG_COUNT))
                .await
                .unwrap_or(0);
            if !self.chrome.wait_until(&click, self.short_wait).await {
                tracing::debug!(url, "No quota button");
                continue;
            }

            let opened: String = self.chrome.eval(scripts::OPENED_URL).await.unwrap_or_default();
            if !opened.is_empty() {
                self.chrome.goto(&opened).await.map_err(|e| e.to_string())?;
                self.settle().await;
            }

            if self
                .chrome
                .wait_until(&scripts::quota_form_opened(before), FORM_OPEN_WAIT)
                .await
            {
                tracing::debug!(url, "Quota form open");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
