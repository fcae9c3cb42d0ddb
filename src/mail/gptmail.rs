//! GPTMail client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use url::Url;

use crate::config::{EmailProvider, GptMailConfig};
use crate::error::{WorkflowError, WorkflowResult};
use crate::http::{parse_lenient_json, snippet, str_field};
use crate::mail::otp::{InboxScan, first_code};
use crate::mail::{MailAddress, Mailbox, pick_domain, prefix_or_random, sort_newest_first};

/// GPTMail API client.
#[derive(Debug, Clone)]
pub struct GptMailClient {
    client: Client,
    api_base: String,
    api_key: String,
    prefix: String,
    domains: Vec<String>,
}

impl GptMailClient {
    /// Create a client from the `[gptmail]` section.
    #[must_use]
    pub fn new(client: Client, config: &GptMailConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            prefix: config.prefix.clone(),
            domains: config.domains.clone(),
        }
    }

    fn url(&self, path: &str) -> WorkflowResult<Url> {
        Url::parse(&format!("{}{path}", self.api_base))
            .map_err(|e| WorkflowError::Config(format!("invalid gptmail.api_base: {e}")))
    }

    /// Create an address, random unless `prefix` or `domain` is given.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Network`] when GPTMail is unreachable or refuses.
    pub async fn generate(
        &self,
        prefix: Option<&str>,
        domain: Option<&str>,
    ) -> WorkflowResult<MailAddress> {
        let request = if prefix.is_some() || domain.is_some() {
            let mut payload = json!({ "provider": "gptmail" });
            if let Some(prefix) = prefix {
                payload["prefix"] = json!(prefix);
            }
            if let Some(domain) = domain {
                payload["domain"] = json!(domain);
            }
            self.client.post(self.url("/custom")?).json(&payload)
        } else {
            let mut url = self.url("/generate")?;
            url.query_pairs_mut().append_pair("provider", "gptmail");
            self.client.get(url)
        };

        let data = self.send(request).await?;
        let email = data.get("data").map(|d| str_field(d, "email")).unwrap_or_default();
        if !email.is_empty() && data.get("success").and_then(Value::as_bool) == Some(true) {
            tracing::info!(email = %email, "GPTMail address created");
            return Ok(MailAddress::new(email));
        }

        Err(WorkflowError::Network(format!(
            "GPTMail could not create an address: {}",
            failure_reason(&data, "generate-email failed")
        )))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> WorkflowResult<Value> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.as_u16() >= 400 {
            return Err(WorkflowError::Network(format!(
                "GPTMail HTTP {}: {}",
                status.as_u16(),
                snippet(&text)
            )));
        }

        match parse_lenient_json(&text) {
            Ok(Value::Null) => Ok(json!({})),
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(WorkflowError::Network(
                "GPTMail returned non-object JSON".to_string(),
            )),
            Err(_) => Err(WorkflowError::Network(format!(
                "GPTMail returned invalid JSON: {}",
                snippet(&text)
            ))),
        }
    }
}

fn failure_reason(data: &Value, fallback: &str) -> String {
    let error = str_field(data, "error");
    if !error.is_empty() {
        return error;
    }
    let message = str_field(data, "message");
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

#[async_trait]
impl Mailbox for GptMailClient {
    fn provider(&self) -> EmailProvider {
        EmailProvider::GptMail
    }

    async fn create_address(&self) -> WorkflowResult<MailAddress> {
        let prefix = prefix_or_random(&self.prefix);
        let domain = pick_domain(&self.domains);
        self.generate(Some(&prefix), domain.as_deref()).await
    }

    async fn check_inbox(&self, address: &MailAddress) -> WorkflowResult<InboxScan> {
        let mut url = self.url(&format!("/emails/{}", address.email))?;
        url.query_pairs_mut().append_pair("provider", "gptmail");

        let data = self.send(self.client.get(url)).await?;
        if data.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(WorkflowError::Network(format!(
                "GPTMail inbox error: {}",
                failure_reason(&data, "get-emails failed")
            )));
        }

        let mut emails: Vec<Value> = data
            .pointer("/data/emails")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter(|i| i.is_object()).cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut emails, |e| {
            let at = str_field(e, "created_at");
            if at.is_empty() { str_field(e, "date") } else { at }
        });

        let code = emails.iter().find_map(|e| {
            let subject = str_field(e, "subject");
            let content = str_field(e, "content");
            first_code([subject.as_str(), content.as_str()])
        });

        Ok(InboxScan {
            message_count: emails.len(),
            newest_subject: emails.first().map(|e| str_field(e, "subject")),
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client_for(server: &MockServer) -> GptMailClient {
        let config = GptMailConfig {
            api_base: server.base_url(),
            api_key: "gm-key".to_string(),
            prefix: "team".to_string(),
            domains: vec!["mail.test".to_string()],
        };
        GptMailClient::new(Client::new(), &config)
    }

    #[tokio::test]
    async fn test_create_address_uses_custom_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/custom")
                    .header("X-API-Key", "gm-key")
                    .json_body(json!({
                        "provider": "gptmail",
                        "prefix": "team",
                        "domain": "mail.test"
                    }));
                then.status(200)
                    .json_body(json!({"success": true, "data": {"email": "team@mail.test"}}));
            })
            .await;

        let address = client_for(&server).create_address().await.unwrap();
        assert_eq!(address.email, "team@mail.test");
        assert!(address.token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_without_hints_uses_get() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/generate")
                    .query_param("provider", "gptmail");
                then.status(200)
                    .body("null\n{\"success\":true,\"data\":{\"email\":\"r@mail.test\"}}");
            })
            .await;

        let address = client_for(&server).generate(None, None).await.unwrap();
        assert_eq!(address.email, "r@mail.test");
    }

    #[tokio::test]
    async fn test_create_address_reports_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/custom");
                then.status(200)
                    .json_body(json!({"success": false, "error": "quota exhausted"}));
            })
            .await;

        let err = client_for(&server).create_address().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Network(ref m) if m.contains("quota exhausted")));
    }

    #[tokio::test]
    async fn test_check_inbox_finds_code_in_newest_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/emails/team@mail.test")
                    .query_param("provider", "gptmail");
                then.status(200).json_body(json!({
                    "success": true,
                    "data": {"emails": [
                        {"subject": "Old", "content": "code 111111", "created_at": "2024-01-01T00:00:00Z"},
                        {"subject": "Your code 222222", "content": "", "created_at": "2024-01-02T00:00:00Z"}
                    ]}
                }));
            })
            .await;

        let scan = client_for(&server)
            .check_inbox(&MailAddress::new("team@mail.test"))
            .await
            .unwrap();
        assert_eq!(scan.message_count, 2);
        assert_eq!(scan.code.as_deref(), Some("222222"));
        assert_eq!(scan.newest_subject.as_deref(), Some("Your code 222222"));
    }

    #[tokio::test]
    async fn test_check_inbox_http_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/emails/team@mail.test");
                then.status(401).body("bad key");
            })
            .await;

        let err = client_for(&server)
            .check_inbox(&MailAddress::new("team@mail.test"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
