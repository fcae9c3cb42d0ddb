//! Smoke test of a generated key against the OpenAI-compatible endpoint.

use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::redact_key;
use crate::error::WorkflowResult;
use crate::http::snippet;

/// Public LongCat API host.
pub const DEFAULT_API_BASE: &str = "https://api.longcat.chat";
/// Model used when none is given.
pub const DEFAULT_MODEL: &str = "LongCat-Flash-Chat";
/// Prompt used when none is given.
pub const DEFAULT_PROMPT: &str = "你好";

const MAX_TOKENS: u32 = 128;

/// Outcome of one smoke check. Never contains the full key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeReport {
    /// Chat request answered with 200.
    pub ok: bool,
    /// Redacted key.
    pub key: String,
    /// Chat completion HTTP status.
    pub status: u16,
    /// `GET /models` answered with 200; `None` when it could not be sent.
    pub models_ok: Option<bool>,
    /// Assistant reply, when present.
    pub reply: Option<String>,
    /// Start of the error body on failure.
    pub error_body: Option<String>,
}

/// Client for `/openai/v1`.
#[derive(Debug, Clone)]
pub struct SmokeClient {
    client: Client,
    base_url: String,
}

impl SmokeClient {
    /// Create a client for `base_url` (e.g. [`DEFAULT_API_BASE`]).
    #[must_use]
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// List models, then send one chat completion.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Network`](crate::error::WorkflowError::Network)
    /// when the chat request cannot be sent.
    pub async fn check(&self, key: &str, model: &str, prompt: &str) -> WorkflowResult<SmokeReport> {
        let models_ok = match self
            .client
            .get(format!("{}/openai/v1/models", self.base_url))
            .bearer_auth(key)
            .send()
            .await
        {
            Ok(response) => Some(response.status().as_u16() == 200),
            Err(e) => {
                tracing::debug!(error = %e, "Model list request failed");
                None
            }
        };

        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": MAX_TOKENS,
        });
        let response = self
            .client
            .post(format!("{}/openai/v1/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let mut report = SmokeReport {
            ok: status == 200,
            key: redact_key(key),
            status,
            models_ok,
            reply: None,
            error_body: None,
        };
        if report.ok {
            report.reply = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/choices/0/message/content")
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                });
        } else {
            report.error_body = Some(snippet(&text));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    #[tokio::test]
    async fn test_successful_chat() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/openai/v1/models")
                    .header("Authorization", "Bearer ak_1234567890");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/openai/v1/chat/completions")
                    .json_body(json!({
                        "model": DEFAULT_MODEL,
                        "messages": [{"role": "user", "content": DEFAULT_PROMPT}],
                        "max_tokens": 128
                    }));
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "你好！"}}]
                }));
            })
            .await;

        let report = SmokeClient::new(Client::new(), &server.base_url())
            .check("ak_1234567890", DEFAULT_MODEL, DEFAULT_PROMPT)
            .await
            .unwrap();

        chat.assert_async().await;
        assert!(report.ok);
        assert_eq!(report.models_ok, Some(true));
        assert_eq!(report.reply.as_deref(), Some("你好！"));
        assert_eq!(report.key, "ak_1...7890");
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/openai/v1/models");
                then.status(401);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/openai/v1/chat/completions");
                then.status(401).body("{\"error\":\"invalid api key\"}");
            })
            .await;

        let report = SmokeClient::new(Client::new(), &server.base_url())
            .check("ak_bad_key_000", DEFAULT_MODEL, "hi")
            .await
            .unwrap();

        assert!(!report.ok);
        assert_eq!(report.status, 401);
        assert_eq!(report.models_ok, Some(false));
        assert!(report.error_body.unwrap().contains("invalid api key"));
    }
}
