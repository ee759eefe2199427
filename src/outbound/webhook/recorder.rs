use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error};
use uuid::Uuid;

use super::delivery_log::{DeliveryLogStore, DeliveryRecord};
use super::schemas::{DeliveryOutcome, truncate_body};
use crate::domain::WebhookEvent;

/// Default cap on stored response bodies, in characters.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 1000;

/// Writes one [`DeliveryRecord`] per attempt.
///
/// Recording is best effort: a store failure is logged and dropped so the
/// delivery pipeline never fails because its audit trail did.
#[derive(Clone)]
pub struct DeliveryRecorder {
    store: Arc<dyn DeliveryLogStore>,
    body_limit: usize,
}

impl DeliveryRecorder {
    pub fn new(store: Arc<dyn DeliveryLogStore>) -> Self {
        Self {
            store,
            body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeliveryLogStore> {
        &self.store
    }

    /// Build the record for one attempt.
    pub fn build_record(
        &self,
        endpoint_id: &str,
        event: WebhookEvent,
        payload: &Value,
        outcome: &DeliveryOutcome,
        retry_count: u32,
    ) -> DeliveryRecord {
        let (response_status, response_body) = if outcome.is_transport_failure() {
            (None, None)
        } else {
            (
                Some(outcome.status),
                Some(truncate_body(&outcome.body, self.body_limit)),
            )
        };

        DeliveryRecord {
            id: Uuid::new_v4(),
            endpoint_id: endpoint_id.to_string(),
            event,
            payload: payload.clone(),
            response_status,
            response_body,
            error_message: outcome.error.clone(),
            retry_count,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }

    /// Persist one attempt. Never fails.
    pub async fn record(
        &self,
        endpoint_id: &str,
        event: WebhookEvent,
        payload: &Value,
        outcome: &DeliveryOutcome,
        retry_count: u32,
    ) {
        let record = self.build_record(endpoint_id, event, payload, outcome, retry_count);

        match self.store.append(&record).await {
            Ok(()) => debug!(
                endpoint_id = %endpoint_id,
                event = %event,
                retry_count = retry_count,
                record_id = %record.id,
                "Delivery attempt recorded"
            ),
            Err(e) => error!(
                endpoint_id = %endpoint_id,
                event = %event,
                retry_count = retry_count,
                error = %e,
                "Failed to record delivery attempt"
            ),
        }
    }
}
