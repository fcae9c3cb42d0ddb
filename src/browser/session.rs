//! Chromium session over the DevTools protocol.

use std::time::Duration;

use chromiumoxide::Handler;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::config::BrowserConfig;
use crate::error::{WorkflowError, WorkflowResult};

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const LAUNCH_RETRY_DELAY: Duration = Duration::from_secs(2);

const BASE_ARGS: &[&str] = &[
    "--no-first-run",
    "--disable-infobars",
    "--incognito",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--no-sandbox",
    "--no-proxy-server",
];

/// Chromium command-line flags for a session.
#[must_use]
pub fn chrome_args(headless: bool) -> Vec<String> {
    let mut args: Vec<String> = BASE_ARGS.iter().map(ToString::to_string).collect();
    if headless {
        args.push("--headless=new".to_string());
        args.push("--window-size=1920,1080".to_string());
    }
    args
}

fn automation(action: &str, err: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Automation(format!("{action} failed: {err}"))
}

/// One launched browser with a single working tab.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl std::fmt::Debug for ChromeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeSession").finish_non_exhaustive()
    }
}

impl ChromeSession {
    /// Launch Chromium, retrying `launch_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Network`] when no attempt succeeds.
    pub async fn launch(config: &BrowserConfig) -> WorkflowResult<Self> {
        let attempts = config.launch_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::launch_once(config).await {
                Ok(session) => {
                    tracing::info!(attempt, headless = config.headless, "Browser launched");
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Browser launch failed");
                    last_error = e;
                    if attempt < attempts {
                        sleep(LAUNCH_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(WorkflowError::Network(format!(
            "browser launch failed after {attempts} attempts: {last_error}"
        )))
    }

    async fn launch_once(config: &BrowserConfig) -> Result<Self, String> {
        let mut builder = ChromeConfig::builder()
            .with_head()
            .args(chrome_args(config.headless))
            .request_timeout(Duration::from_secs(config.wait_timeout.max(1)));
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let chrome = builder.build()?;

        let (browser, handler) = Browser::launch(chrome).await.map_err(|e| e.to_string())?;
        let handler_task = spawn_handler(handler);

        match browser.new_page("about:blank").await {
            Ok(page) => Ok(Self {
                browser,
                page,
                handler_task,
            }),
            Err(e) => {
                handler_task.abort();
                Err(e.to_string())
            }
        }
    }

    /// Navigate and wait for the load event.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Network`] when the page cannot be reached.
    pub async fn goto(&self, url: &str) -> WorkflowResult<()> {
        tracing::debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| WorkflowError::Network(format!("navigation to {url} failed: {e}")))?;
        Ok(())
    }

    /// Reload the current page.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Automation`] if the reload command fails.
    pub async fn reload(&self) -> WorkflowResult<()> {
        self.page.reload().await.map_err(|e| automation("reload", e))?;
        Ok(())
    }

    /// Current URL, empty when unknown.
    pub async fn current_url(&self) -> String {
        self.page.url().await.ok().flatten().unwrap_or_default()
    }

    /// Evaluate an expression, awaiting promises.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Automation`] when evaluation throws or the
    /// protocol call fails.
    pub async fn eval_value(&self, script: &str) -> WorkflowResult<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| automation("evaluate", e))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| automation("evaluate", e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Evaluate and deserialize.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Automation`] if evaluation or decoding fails.
    pub async fn eval<T: DeserializeOwned>(&self, script: &str) -> WorkflowResult<T> {
        let value = self.eval_value(script).await?;
        serde_json::from_value(value).map_err(|e| automation("decode script result", e))
    }

    /// Evaluate a predicate; failures count as `false`.
    pub async fn check(&self, script: &str) -> bool {
        match self.eval_value(script).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                tracing::debug!(error = %e, "Predicate evaluation failed");
                false
            }
        }
    }

    /// Re-evaluate `script` until it yields `true` or `timeout` elapses.
    pub async fn wait_until(&self, script: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check(script).await {
                return true;
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Click `selector` and type `text` with real key events.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Automation`] if the element is missing or
    /// rejects input.
    pub async fn type_into(&self, selector: &str, text: &str) -> WorkflowResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| automation(&format!("find {selector}"), e))?;
        element
            .click()
            .await
            .map_err(|e| automation(&format!("click {selector}"), e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| automation(&format!("type into {selector}"), e))?;
        Ok(())
    }

    /// Close the browser and stop the handler task.
    pub async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!(error = %e, "Browser wait failed");
        }
        self.handler_task.abort();
        tracing::info!("Browser closed");
    }
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!(error = %e, "CDP handler event error");
            }
        }
    })
}
