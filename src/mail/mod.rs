//! Temporary mailbox clients.
//!
//! A [`Mailbox`] hands out a throwaway address and later finds the OTP that
//! the passport login mails to it. Two providers are supported:
//!
//! ```text
//! GPTMail   POST /custom            GET /emails/{address}
//! DuckMail  POST /accounts, /token  GET /messages, /messages/{id}
//! ```

pub mod duckmail;
pub mod gptmail;
pub mod otp;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use reqwest::Client;

use crate::config::{AppConfig, EmailProvider};
use crate::error::WorkflowResult;

pub use duckmail::DuckMailClient;
pub use gptmail::GptMailClient;
pub use otp::{InboxScan, OtpPolicy, extract_code, poll_for_code};

/// A mailbox address plus whatever the provider needs to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddress {
    /// Full address.
    pub email: String,
    /// Bearer token for providers with per-account auth.
    pub token: Option<String>,
}

impl MailAddress {
    /// Address without provider credentials.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: None,
        }
    }
}

impl std::fmt::Display for MailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.email)
    }
}

/// Temporary mailbox provider.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Which provider backs this mailbox.
    fn provider(&self) -> EmailProvider;

    /// Create a fresh address.
    async fn create_address(&self) -> WorkflowResult<MailAddress>;

    /// Check the inbox once, newest message first.
    async fn check_inbox(&self, address: &MailAddress) -> WorkflowResult<InboxScan>;

    /// Poll until a code arrives or the policy's timeout elapses.
    async fn wait_for_code(
        &self,
        address: &MailAddress,
        policy: OtpPolicy,
    ) -> WorkflowResult<String> {
        poll_for_code(self, address, policy).await
    }
}

/// Build the mailbox selected by configuration.
#[must_use]
pub fn build_mailbox(config: &AppConfig, client: Client) -> Arc<dyn Mailbox> {
    match config.email_provider() {
        EmailProvider::GptMail => Arc::new(GptMailClient::new(client, &config.gptmail)),
        EmailProvider::DuckMail => Arc::new(DuckMailClient::new(client, &config.duckmail)),
    }
}

/// Random string over lowercase letters and digits.
pub(crate) fn random_lower_alnum(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Configured prefix, or eight random characters tagged `-lc`.
pub(crate) fn prefix_or_random(prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        format!("{}-lc", random_lower_alnum(8))
    } else {
        prefix.to_string()
    }
}

/// One configured domain at random, if any are configured.
pub(crate) fn pick_domain(domains: &[String]) -> Option<String> {
    let candidates: Vec<&String> = domains.iter().filter(|d| !d.trim().is_empty()).collect();
    candidates
        .choose(&mut rand::rng())
        .map(|d| d.trim().to_string())
}

/// Sort newest first by an ISO-8601 timestamp; entries without one keep their order.
pub(crate) fn sort_newest_first<T>(items: &mut [T], timestamp: impl Fn(&T) -> String) {
    items.sort_by_key(|item| std::cmp::Reverse(timestamp(item)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_or_random() {
        assert_eq!(prefix_or_random(" team "), "team");
        let generated = prefix_or_random("");
        assert!(generated.ends_with("-lc"));
        assert_eq!(generated.len(), 11);
    }

    #[test]
    fn test_pick_domain() {
        assert_eq!(pick_domain(&[]), None);
        assert_eq!(pick_domain(&[" ".to_string()]), None);
        assert_eq!(
            pick_domain(&["only.example".to_string()]),
            Some("only.example".to_string())
        );
    }

    #[test]
    fn test_sort_newest_first() {
        let mut items = vec!["2024-01-01", "2024-03-01", "2024-02-01"];
        sort_newest_first(&mut items, |s| (*s).to_string());
        assert_eq!(items, vec!["2024-03-01", "2024-02-01", "2024-01-01"]);
    }

    #[test]
    fn test_build_mailbox_follows_provider() {
        let mut config = AppConfig::default();
        let client = Client::new();
        assert_eq!(
            build_mailbox(&config, client.clone()).provider(),
            EmailProvider::GptMail
        );

        config.duckmail.api_key = "dk".to_string();
        assert_eq!(build_mailbox(&config, client).provider(), EmailProvider::DuckMail);
    }
}
