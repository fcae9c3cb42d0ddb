//! Shared outbound HTTP helpers.

use reqwest::Client;
use serde_json::Value;

use crate::config::RequestConfig;

/// Longest response snippet carried into error messages.
pub const SNIPPET_LEN: usize = 300;

/// Build the client used for mailbox, sync and smoke calls.
///
/// Proxy variables from the environment are ignored.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(request: &RequestConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(request.timeout())
        .user_agent(request.user_agent.clone())
        .no_proxy()
        .build()
}

/// Parse a body that may carry an XSSI guard or several JSON values.
///
/// The last complete value wins; an empty body parses as `null`.
///
/// # Errors
///
/// Returns the first syntax error encountered.
pub fn parse_lenient_json(text: &str) -> Result<Value, serde_json::Error> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix(")]}',") {
        body = rest.split_once('\n').map_or(rest, |(_, tail)| tail).trim();
    }

    let mut last = Value::Null;
    for value in serde_json::Deserializer::from_str(body).into_iter::<Value>() {
        last = value?;
    }
    Ok(last)
}

/// First [`SNIPPET_LEN`] characters of a body, for error messages.
#[must_use]
pub fn snippet(text: &str) -> String {
    text.trim().chars().take(SNIPPET_LEN).collect()
}

/// Read a string field, tolerating numbers and missing values.
#[must_use]
pub fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
