//! Outgoing webhook calls made by `call_webhook` actions.
//!
//! The engine talks to a [`WebhookSender`] so tests can swap the HTTP client
//! for a mock.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::config::WebhookSettings;
use crate::error::CrmError;

/// Response bodies longer than this are truncated in logs and messages.
const MAX_BODY_CHARS: usize = 1000;

/// A fully templated webhook request.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// What came back from the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends webhook requests.
#[cfg_attr(test, mockall::automock)]
pub trait WebhookSender {
    /// Send a request and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns a webhook error when no response was received (bad URL,
    /// connection failure, timeout).
    fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, CrmError>;
}

/// Blocking HTTP implementation backed by `reqwest`.
pub struct HttpWebhookSender {
    client: reqwest::blocking::Client,
}

impl HttpWebhookSender {
    /// Build a client with the configured timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns a config error if the HTTP client cannot be built.
    pub fn new(settings: &WebhookSettings) -> Result<Self, CrmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| CrmError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl WebhookSender for HttpWebhookSender {
    fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, CrmError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CrmError::Webhook(format!("Invalid HTTP method: {}", request.method)))?;

        let mut builder = self.client.request(method.clone(), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if method != reqwest::Method::GET {
            builder = builder.json(&request.body);
        }

        let response = builder.send().map_err(|e| {
            let reason = if e.is_timeout() {
                "Request timed out".to_string()
            } else if e.is_connect() {
                "Connection failed".to_string()
            } else {
                format!("Request failed: {e}")
            };
            CrmError::Webhook(format!("{} {}: {reason}", method, request.url))
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .unwrap_or_default()
            .chars()
            .take(MAX_BODY_CHARS)
            .collect();

        tracing::debug!(url = %request.url, status, "webhook response");
        Ok(WebhookResponse { status, body })
    }
}
