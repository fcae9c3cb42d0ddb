//! gpt-load management API client.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{SyncError, SyncResult};
use crate::http::snippet;

const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(800);

/// A key group as listed by `GET /api/groups`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Group {
    /// Group id.
    #[serde(default)]
    pub id: i64,
    /// Internal name.
    #[serde(default)]
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

/// Import task state from `GET /api/tasks/status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskStatus {
    /// Task kind, e.g. `KEY_IMPORT`.
    #[serde(default)]
    pub task_type: String,
    /// Whether the task is still running.
    #[serde(default)]
    pub is_running: bool,
    /// Group the task works on.
    #[serde(default)]
    pub group_name: String,
    /// Items processed so far.
    #[serde(default)]
    pub processed: u64,
    /// Items in total.
    #[serde(default)]
    pub total: u64,
    /// Task result, shape depends on the task.
    #[serde(default)]
    pub result: Value,
    /// Task error, empty on success.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub error: String,
}

impl TaskStatus {
    /// `added_count` from an import result.
    #[must_use]
    pub fn added_count(&self) -> Option<u64> {
        self.result.get("added_count").and_then(Value::as_u64)
    }

    /// `ignored_count` from an import result.
    #[must_use]
    pub fn ignored_count(&self) -> Option<u64> {
        self.result.get("ignored_count").and_then(Value::as_u64)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Client for the gpt-load `/api` endpoints.
#[derive(Debug, Clone)]
pub struct GptLoadClient {
    client: Client,
    base_url: String,
    auth_key: String,
    backoff: Duration,
}

impl GptLoadClient {
    /// Create a client authenticating with `auth_key` as a bearer token.
    #[must_use]
    pub fn new(client: Client, base_url: &str, auth_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            auth_key: auth_key.trim().to_string(),
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Override the base retry delay.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/groups`.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] after retries are exhausted or on a rejection.
    pub async fn list_groups(&self) -> SyncResult<Vec<Group>> {
        let data: Option<Vec<Group>> = self
            .with_retry("GET /api/groups", || self.call(self.client.get(self.url("/api/groups"))))
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// Find a group by `name` or `display_name`, with or without a leading `#`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::GroupNotFound`] when nothing matches.
    pub async fn resolve_group_id(&self, group_name: &str) -> SyncResult<i64> {
        let target = group_name.trim();
        if target.is_empty() {
            return Err(SyncError::GroupNotFound("(empty group name)".to_string()));
        }
        let bare = target.strip_prefix('#').unwrap_or(target);

        let groups = self.list_groups().await?;
        groups
            .iter()
            .find(|g| {
                [target, bare]
                    .iter()
                    .any(|t| !t.is_empty() && (g.name == *t || g.display_name == *t))
            })
            .map(|g| g.id)
            .ok_or_else(|| {
                let sample: Vec<&str> = groups.iter().take(10).map(|g| g.name.as_str()).collect();
                SyncError::GroupNotFound(format!("{target} (known: {})", sample.join(", ")))
            })
    }

    /// `POST /api/keys/add-async`.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] after retries are exhausted or on a rejection.
    pub async fn add_keys_async(&self, group_id: i64, keys_text: &str) -> SyncResult<TaskStatus> {
        let body = json!({ "group_id": group_id, "keys_text": keys_text });
        let data: Option<TaskStatus> = self
            .with_retry("POST /api/keys/add-async", || {
                self.call(self.client.post(self.url("/api/keys/add-async")).json(&body))
            })
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// `GET /api/tasks/status`.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] after retries are exhausted or on a rejection.
    pub async fn task_status(&self) -> SyncResult<TaskStatus> {
        let data: Option<TaskStatus> = self
            .with_retry("GET /api/tasks/status", || {
                self.call(self.client.get(self.url("/api/tasks/status")))
            })
            .await?;
        Ok(data.unwrap_or_default())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send one request and unwrap the `{code, message, data}` envelope.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<Option<T>> {
        let response = request
            .bearer_auth(&self.auth_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        if status != 200 {
            return Err(SyncError::Http {
                status,
                body: snippet(&text),
            });
        }

        let envelope: Value =
            serde_json::from_str(&text).map_err(|e| SyncError::Decode(e.to_string()))?;
        let code = envelope.get("code").and_then(Value::as_i64);
        if code != Some(0) {
            return Err(SyncError::Api {
                code: code.unwrap_or(-1),
                message: envelope
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| snippet(&text), ToString::to_string),
            });
        }

        match envelope.get("data") {
            None | Some(Value::Null) => Ok(None),
            Some(data) => serde_json::from_value(data.clone())
                .map(Some)
                .map_err(|e| SyncError::Decode(e.to_string())),
        }
    }

    /// Retry transport errors, 429 and 5xx with exponential backoff plus jitter.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let jitter = rand::rng().random_range(0.0..0.25);
                    let delay = self.backoff * 2u32.pow(attempt) + self.backoff.mul_f64(jitter);
                    tracing::debug!(
                        request = what,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying gpt-load request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client_for(server: &MockServer) -> GptLoadClient {
        GptLoadClient::new(Client::new(), &server.base_url(), "admin-key")
            .with_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_resolve_group_by_display_name_without_hash() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/groups")
                    .header("Authorization", "Bearer admin-key");
                then.status(200).json_body(json!({
                    "code": 0,
                    "message": "ok",
                    "data": [
                        {"id": 3, "name": "other", "display_name": "Other"},
                        {"id": 7, "name": "lc-pool", "display_name": "pinhaofan"}
                    ]
                }));
            })
            .await;

        let id = client_for(&server).resolve_group_id("#pinhaofan").await.unwrap();
        assert_eq!(id, 7);
    }

    #[tokio::test]
    async fn test_resolve_group_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/groups");
                then.status(200)
                    .json_body(json!({"code": 0, "message": "ok", "data": []}));
            })
            .await;

        let err = client_for(&server).resolve_group_id("missing").await.unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_envelope_error_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/keys/add-async");
                then.status(200)
                    .json_body(json!({"code": 10001, "message": "group disabled"}));
            })
            .await;

        let err = client_for(&server).add_keys_async(1, "k").await.unwrap_err();
        assert!(matches!(err, SyncError::Api { code: 10001, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_retried_three_times() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks/status");
                then.status(503).body("unavailable");
            })
            .await;

        let err = client_for(&server).task_status().await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 503, .. }));
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/groups");
                then.status(401).body("unauthorized");
            })
            .await;

        let err = client_for(&server).list_groups().await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 401, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_add_keys_parses_task() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/keys/add-async")
                    .json_body(json!({"group_id": 7, "keys_text": "k1\nk2"}));
                then.status(200).json_body(json!({
                    "code": 0,
                    "message": "ok",
                    "data": {"task_type": "KEY_IMPORT", "is_running": true, "total": 2, "error": null}
                }));
            })
            .await;

        let task = client_for(&server).add_keys_async(7, "k1\nk2").await.unwrap();
        assert!(task.is_running);
        assert_eq!(task.total, 2);
        assert!(task.error.is_empty());
    }
}
