//! DuckMail client (mail.tm compatible API).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use rand::seq::IndexedRandom;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};

use crate::config::{DuckMailConfig, EmailProvider};
use crate::error::{WorkflowError, WorkflowResult};
use crate::http::{snippet, str_field};
use crate::mail::otp::{InboxScan, first_code};
use crate::mail::{
    MailAddress, Mailbox, pick_domain, prefix_or_random, random_lower_alnum, sort_newest_first,
};

const DOMAIN_CACHE_TTL: Duration = Duration::from_secs(600);
const MAX_CREATE_ATTEMPTS: usize = 8;
const FULL_BODY_MESSAGES: usize = 3;

/// DuckMail API client.
#[derive(Debug)]
pub struct DuckMailClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    prefix: String,
    domains: Vec<String>,
    domain_cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl DuckMailClient {
    /// Create a client from the `[duckmail]` section.
    #[must_use]
    pub fn new(client: Client, config: &DuckMailConfig) -> Self {
        let api_key = config.api_key.trim();
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: (!api_key.is_empty()).then(|| api_key.to_string()),
            prefix: config.prefix.clone(),
            domains: config.domains.clone(),
            domain_cache: Mutex::new(None),
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("Accept", "application/json");
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(self.client.get(format!("{}{path}", self.api_base)))
    }

    fn post(&self, path: &str, body: &Value) -> RequestBuilder {
        self.request(self.client.post(format!("{}{path}", self.api_base)).json(body))
    }

    /// Send and return `(status, json-or-empty, raw body)`.
    async fn send(&self, builder: RequestBuilder) -> WorkflowResult<(StatusCode, Value, String)> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let value = serde_json::from_str::<Value>(&text)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        Ok((status, value, text))
    }

    /// Verified domains offered by the provider, cached for ten minutes.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Network`] when the domain list cannot be fetched.
    pub async fn list_domains(&self) -> WorkflowResult<Vec<String>> {
        if let Some(domains) = self.cached_domains() {
            return Ok(domains);
        }

        let (status, data, text) = self.send(self.get("/domains")).await?;
        if status.as_u16() >= 400 {
            return Err(WorkflowError::Network(format!(
                "DuckMail domains: {}",
                summarize_error(status, &data, &text)
            )));
        }

        let domains: Vec<String> = members(&data)
            .iter()
            .filter(|item| item.get("isVerified").and_then(Value::as_bool) != Some(false))
            .map(|item| str_field(item, "domain"))
            .filter(|domain| !domain.is_empty())
            .collect();

        *self.domain_cache.lock() = Some((Instant::now(), domains.clone()));
        Ok(domains)
    }

    fn cached_domains(&self) -> Option<Vec<String>> {
        let cache = self.domain_cache.lock();
        let (at, domains) = cache.as_ref()?;
        (at.elapsed() < DOMAIN_CACHE_TTL && !domains.is_empty()).then(|| domains.clone())
    }

    async fn choose_domain(&self) -> WorkflowResult<String> {
        if let Some(domain) = pick_domain(&self.domains) {
            return Ok(domain);
        }
        let domains = self.list_domains().await?;
        domains
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| WorkflowError::Network("DuckMail: no domains available".to_string()))
    }

    async fn create_account(&self, address: &str, password: &str) -> WorkflowResult<Option<String>> {
        let body = json!({ "address": address, "password": password });
        let (status, data, text) = self.send(self.post("/accounts", &body)).await?;
        if matches!(status.as_u16(), 200 | 201) {
            return Ok(None);
        }
        Ok(Some(summarize_error(status, &data, &text)))
    }

    async fn login(&self, address: &str, password: &str) -> WorkflowResult<String> {
        let body = json!({ "address": address, "password": password });
        let (status, data, text) = self.send(self.post("/token", &body)).await?;
        if status.as_u16() >= 400 {
            return Err(WorkflowError::Network(format!(
                "DuckMail login: {}",
                summarize_error(status, &data, &text)
            )));
        }
        let token = str_field(&data, "token");
        if token.is_empty() {
            return Err(WorkflowError::Network(
                "DuckMail: missing token in response".to_string(),
            ));
        }
        Ok(token)
    }

    async fn full_body(&self, token: &str, id: &str) -> Option<String> {
        let request = self.get(&format!("/messages/{id}")).bearer_auth(token);
        let (status, data, _) = self.send(request).await.ok()?;
        if status.as_u16() >= 400 {
            return None;
        }
        let html = match data.get("html") {
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            Some(Value::String(html)) => html.clone(),
            _ => String::new(),
        };
        Some(format!("{}\n{html}", str_field(&data, "text")))
    }
}

#[async_trait]
impl Mailbox for DuckMailClient {
    fn provider(&self) -> EmailProvider {
        EmailProvider::DuckMail
    }

    async fn create_address(&self) -> WorkflowResult<MailAddress> {
        let domain = self.choose_domain().await?;
        let base = sanitize_local_part(&prefix_or_random(&self.prefix));

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let tail = random_lower_alnum(10);
            let local = if base.is_empty() {
                format!("{tail}-lc")
            } else {
                format!("{base}-{tail}")
            };
            let address = format!("{local}@{domain}");
            let password = random_password(14);

            match self.create_account(&address, &password).await? {
                None => {
                    let token = self.login(&address, &password).await?;
                    tracing::info!(email = %address, "DuckMail address created");
                    return Ok(MailAddress {
                        email: address,
                        token: Some(token),
                    });
                }
                Some(reason) if is_collision(&reason) => {
                    tracing::debug!(email = %address, reason = %reason, "DuckMail address taken");
                }
                Some(reason) => {
                    return Err(WorkflowError::Network(format!(
                        "DuckMail create account failed: {reason}"
                    )));
                }
            }
        }

        Err(WorkflowError::Network(
            "DuckMail create account failed (too many collisions)".to_string(),
        ))
    }

    async fn check_inbox(&self, address: &MailAddress) -> WorkflowResult<InboxScan> {
        let token = address.token.as_deref().ok_or_else(|| {
            WorkflowError::Config(format!("DuckMail: no token for {}", address.email))
        })?;

        let (status, data, text) = self.send(self.get("/messages").bearer_auth(token)).await?;
        if status.as_u16() >= 400 {
            return Err(WorkflowError::Network(format!(
                "DuckMail messages: {}",
                summarize_error(status, &data, &text)
            )));
        }

        let mut messages: Vec<Value> = members(&data).to_vec();
        sort_newest_first(&mut messages, |m| {
            let at = str_field(m, "createdAt");
            if at.is_empty() { str_field(m, "created_at") } else { at }
        });

        let mut code = messages.iter().find_map(|m| {
            let subject = str_field(m, "subject");
            let intro = str_field(m, "intro");
            first_code([subject.as_str(), intro.as_str()])
        });

        if code.is_none() {
            for message in messages.iter().take(FULL_BODY_MESSAGES) {
                let id = str_field(message, "id");
                if id.is_empty() {
                    continue;
                }
                if let Some(body) = self.full_body(token, &id).await {
                    code = first_code([body.as_str()]);
                    if code.is_some() {
                        break;
                    }
                }
            }
        }

        Ok(InboxScan {
            message_count: messages.len(),
            newest_subject: messages.first().map(|m| str_field(m, "subject")),
            code,
        })
    }
}

fn members(data: &Value) -> &[Value] {
    data.get("hydra:member")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn summarize_error(status: StatusCode, data: &Value, text: &str) -> String {
    ["message", "hydra:description", "detail"]
        .into_iter()
        .map(|key| str_field(data, key))
        .find(|msg| !msg.is_empty())
        .map(|msg| snippet(&msg))
        .or_else(|| Some(snippet(text)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn is_collision(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    ["already", "used", "exists"]
        .iter()
        .any(|word| reason.contains(word))
}

/// Lowercase, collapse anything outside `[a-z0-9]` into single dashes, cap at 32.
fn sanitize_local_part(prefix: &str) -> String {
    let mut out = String::new();
    for c in prefix.trim().to_ascii_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').chars().take(32).collect()
}

fn random_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
