use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::retry_strategy::RetryStrategy;
use crate::domain::WebhookEvent;

/// Body POSTed to every subscriber of one trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub event: WebhookEvent,

    pub data: Map<String, Value>,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WebhookPayload {
    /// Create a payload stamped with the current UTC time.
    pub fn new(event: WebhookEvent, data: Map<String, Value>) -> Self {
        Self::at(event, data, OffsetDateTime::now_utc())
    }

    pub fn at(event: WebhookEvent, data: Map<String, Value>, timestamp: OffsetDateTime) -> Self {
        Self {
            event,
            data,
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Timestamp in the same RFC 3339 form used in the JSON body.
    pub fn timestamp_rfc3339(&self) -> Result<String, time::error::Format> {
        self.timestamp.format(&Rfc3339)
    }
}

/// Outcome of one HTTP attempt.
///
/// `status == 0` with `error` set means no HTTP response was received
/// (DNS, refused connection, timeout). Any HTTP status, including 4xx and
/// 5xx, is reported as-is with `error == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: u16,

    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn response(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            error: None,
        }
    }

    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        RetryStrategy::is_success(self.status)
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }
}

/// State of one endpoint's delivery sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,

    Attempting,

    RetryScheduled,

    Succeeded,

    /// Every allowed attempt failed.
    Exhausted,

    /// Retries were stopped by shutdown or by cancelling the endpoint.
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Succeeded | DeliveryState::Exhausted | DeliveryState::Cancelled
        )
    }

    /// Whether a sequence in this state may move to `next`.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        use DeliveryState::*;

        matches!(
            (self, next),
            (Pending, Attempting)
                | (Pending, Cancelled)
                | (Attempting, Succeeded)
                | (Attempting, RetryScheduled)
                | (Attempting, Exhausted)
                | (RetryScheduled, Attempting)
                | (RetryScheduled, Cancelled)
        )
    }
}

/// Keep at most `limit` characters of `body`.
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((byte_index, _)) => body[..byte_index].to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_delivery_state_transitions() {
        use DeliveryState::*;

        assert!(Pending.can_transition_to(Attempting));
        assert!(Attempting.can_transition_to(RetryScheduled));
        assert!(RetryScheduled.can_transition_to(Attempting));
        assert!(RetryScheduled.can_transition_to(Cancelled));
        assert!(Attempting.can_transition_to(Exhausted));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!RetryScheduled.can_transition_to(Succeeded));
        for terminal in [Succeeded, Exhausted, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Attempting));
        }
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_payload_wire_format() -> Result<(), serde_json::Error> {
        let payload = WebhookPayload::at(
            WebhookEvent::DocumentCreated,
            data(json!({"id": "doc-1"})),
            datetime!(2024-02-10 14:10:00 UTC),
        );

        let value: Value = serde_json::from_str(&payload.to_json()?)?;
        assert_eq!(value["event"], "document.created");
        assert_eq!(value["data"]["id"], "doc-1");
        assert_eq!(value["timestamp"], "2024-02-10T14:10:00Z");
        Ok(())
    }

    #[test]
    fn test_header_timestamp_matches_body() -> Result<(), Box<dyn std::error::Error>> {
        let payload = WebhookPayload::new(WebhookEvent::QrCodeScanned, Map::new());
        let value: Value = serde_json::from_str(&payload.to_json()?)?;

        assert_eq!(value["timestamp"], payload.timestamp_rfc3339()?);
        Ok(())
    }

    #[test]
    fn test_outcome_classification() {
        assert!(DeliveryOutcome::response(200, String::new()).is_success());
        assert!(!DeliveryOutcome::response(500, String::new()).is_success());

        let failure = DeliveryOutcome::transport_failure("connection refused");
        assert!(failure.is_transport_failure());
        assert!(!failure.is_success());
        assert_eq!(failure.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryState::Succeeded.is_terminal());
        assert!(DeliveryState::Exhausted.is_terminal());
        assert!(DeliveryState::Cancelled.is_terminal());
        assert!(!DeliveryState::Pending.is_terminal());
        assert!(!DeliveryState::RetryScheduled.is_terminal());
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(1500);
        assert_eq!(truncate_body(&long, 1000).len(), 1000);
        assert_eq!(truncate_body("short", 1000), "short");
        assert_eq!(truncate_body("", 1000), "");
    }

    #[test]
    fn test_truncate_body_counts_characters() {
        let body = "é".repeat(1200);
        let truncated = truncate_body(&body, 1000);
        assert_eq!(truncated.chars().count(), 1000);
    }
}
