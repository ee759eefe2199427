use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::WebhookEvent;
use crate::outbound::webhook::{DeliveryQuery, DeliveryRecord, generate_secret};
use crate::server::AppState;
use crate::server::responses::{ApiError, ResponseBody};

/// Upper bound for `limit` on the deliveries listing.
pub const MAX_DELIVERIES_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventInfo {
    pub event: WebhookEvent,
    pub resource: &'static str,
}

pub async fn list_events() -> ResponseBody<Vec<EventInfo>> {
    let events = WebhookEvent::ALL
        .into_iter()
        .map(|event| EventInfo {
            event,
            resource: event.resource(),
        })
        .collect();

    ResponseBody::ok(events)
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesParams {
    pub endpoint_id: Option<String>,
    pub event: Option<String>,
    pub limit: Option<usize>,
}

impl DeliveriesParams {
    fn into_query(self) -> Result<DeliveryQuery, ApiError> {
        let event = self
            .event
            .map(|name| name.parse::<WebhookEvent>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        Ok(DeliveryQuery {
            endpoint_id: self.endpoint_id,
            event,
            limit: self.limit.map(|limit| limit.min(MAX_DELIVERIES_LIMIT)),
        })
    }
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveriesParams>,
) -> Result<ResponseBody<Vec<DeliveryRecord>>, ApiError> {
    let query = params.into_query()?;

    let records = state
        .delivery_log
        .query(&query)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(ResponseBody::ok(records))
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
    pub event: WebhookEvent,
    pub matched: usize,
}

/// Start a dispatch and answer as soon as the endpoints are known.
pub async fn trigger(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<ResponseBody<TriggerResponse>, ApiError> {
    let event: WebhookEvent = request
        .event
        .parse()
        .map_err(|e: crate::domain::UnknownEvent| ApiError::BadRequest(e.to_string()))?;

    let fan_out = state.dispatcher.fan_out(event, request.data).await;
    tracing::info!(event = %event, matched = fan_out.matched(), "Manual webhook trigger");

    Ok(ResponseBody::new(
        StatusCode::ACCEPTED,
        TriggerResponse {
            event,
            matched: fan_out.matched(),
        },
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretResponse {
    pub secret: String,
}

pub async fn create_secret() -> ResponseBody<SecretResponse> {
    ResponseBody::ok(SecretResponse {
        secret: generate_secret(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliveries_params_parse_event() {
        let params = DeliveriesParams {
            endpoint_id: Some("ep-1".to_string()),
            event: Some("qr_code.scanned".to_string()),
            limit: Some(10),
        };

        let query = params.into_query().unwrap();
        assert_eq!(query.endpoint_id.as_deref(), Some("ep-1"));
        assert_eq!(query.event, Some(WebhookEvent::QrCodeScanned));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn test_deliveries_params_reject_unknown_event() {
        let params = DeliveriesParams {
            event: Some("document.exploded".to_string()),
            ..Default::default()
        };

        assert!(matches!(params.into_query(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_deliveries_params_cap_limit() {
        let params = DeliveriesParams {
            limit: Some(10_000),
            ..Default::default()
        };

        assert_eq!(params.into_query().unwrap().limit, Some(MAX_DELIVERIES_LIMIT));
    }
}
