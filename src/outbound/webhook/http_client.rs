use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::hmac_signer::HmacSigner;
use super::recorder::DEFAULT_RESPONSE_BODY_LIMIT;
use super::schemas::{DeliveryOutcome, WebhookPayload, truncate_body};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for HTTP client operations
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// Sends exactly one signed POST and reports the outcome.
///
/// Implementations never return an error: every failure is folded into a
/// [`DeliveryOutcome`] with `status == 0`.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(&self, url: &str, payload: &WebhookPayload, secret: &str) -> DeliveryOutcome;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
    body_limit: usize,
}

impl WebhookHttpClient {
    /// Create a client with the default 30 second timeout.
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("CenetyWebhooks/{}", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        })
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST the payload, returning the HTTP status and truncated body.
    pub async fn send_webhook(
        &self,
        url: &str,
        payload: &WebhookPayload,
        secret: &str,
    ) -> Result<(u16, String), HttpClientError> {
        // The signature must cover exactly the bytes that are sent.
        let body = payload
            .to_json()
            .map_err(|e| HttpClientError::Serialization(e.to_string()))?;
        let timestamp = payload
            .timestamp_rfc3339()
            .map_err(|e| HttpClientError::Serialization(e.to_string()))?;
        let signature = HmacSigner::new(secret).sign(body.as_bytes());

        debug!(url = %url, event = %payload.event, "Sending webhook");
        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, payload.event.as_str())
            .header(TIMESTAMP_HEADER, timestamp)
            .body(body)
            .send()
            .await
            .map_err(|e| HttpClientError::from_reqwest(e, self.timeout))?;

        let status = response.status().as_u16();
        let body = self.read_response_body(response).await?;

        debug!(
            url = %url,
            status = status,
            response_time_ms = start.elapsed().as_millis() as u64,
            "Webhook response received"
        );

        Ok((status, body))
    }

    /// Read at most `body_limit * 4` bytes, enough for `body_limit` characters
    /// of any UTF-8 text. The rest of the body is never pulled off the wire.
    async fn read_response_body(&self, mut response: Response) -> Result<String, HttpClientError> {
        let max_bytes = self.body_limit.saturating_mul(4);
        let mut buf: Vec<u8> = Vec::new();

        while buf.len() < max_bytes {
            match response
                .chunk()
                .await
                .map_err(|e| HttpClientError::from_reqwest(e, self.timeout))?
            {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
        buf.truncate(max_bytes);

        Ok(truncate_body(&String::from_utf8_lossy(&buf), self.body_limit))
    }
}

#[async_trait]
impl WebhookTransport for WebhookHttpClient {
    async fn deliver(&self, url: &str, payload: &WebhookPayload, secret: &str) -> DeliveryOutcome {
        match self.send_webhook(url, payload, secret).await {
            Ok((status, body)) => DeliveryOutcome::response(status, body),
            Err(e) => {
                warn!(url = %url, event = %payload.event, error = %e, "Webhook request failed");
                DeliveryOutcome::transport_failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() -> Result<(), HttpClientError> {
        let client = WebhookHttpClient::new()?;
        assert_eq!(client.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_http_client_with_custom_timeout() -> Result<(), HttpClientError> {
        let timeout = Duration::from_millis(250);
        let client = WebhookHttpClient::with_timeout(timeout)?;
        assert_eq!(client.timeout(), timeout);
        Ok(())
    }

    #[test]
    fn test_http_client_error_display() {
        let err = HttpClientError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Request timeout after 30s");

        let err = HttpClientError::NetworkError("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() -> Result<(), HttpClientError> {
        let client = WebhookHttpClient::with_timeout(Duration::from_secs(2))?;
        let payload = WebhookPayload::new(
            crate::domain::WebhookEvent::DocumentCreated,
            serde_json::Map::new(),
        );

        // Nothing listens on port 9 of localhost.
        let outcome = client
            .deliver("http://127.0.0.1:9/webhook", &payload, "whsec_test_secret_key")
            .await;

        assert_eq!(outcome.status, 0);
        assert!(outcome.error.is_some_and(|e| !e.is_empty()));
        Ok(())
    }
}
