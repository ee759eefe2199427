//! Per-attempt delivery records and the append-only store they land in.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::WebhookEvent;

/// Default number of records returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Default number of records kept by [`InMemoryDeliveryLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

// ============================================================================
// DeliveryRecord
// ============================================================================

/// One HTTP attempt against one endpoint.
///
/// A delivery retried three times leaves four records with `retry_count`
/// 0, 1, 2 and 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub endpoint_id: String,
    pub event: WebhookEvent,
    /// The full `{event, data, timestamp}` body that was sent.
    pub payload: Value,
    /// `None` when no HTTP response was received.
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl DeliveryRecord {
    /// Status as reported by the transport, `0` meaning no response.
    pub fn status_code(&self) -> u16 {
        self.response_status.unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.response_status, Some(status) if (200..300).contains(&status))
    }
}

// ============================================================================
// DeliveryQuery
// ============================================================================

/// Filter for reading records back, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryQuery {
    pub endpoint_id: Option<String>,
    pub event: Option<WebhookEvent>,
    /// Defaults to [`DEFAULT_QUERY_LIMIT`].
    pub limit: Option<usize>,
}

impl DeliveryQuery {
    pub fn for_endpoint(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: Some(endpoint_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        if let Some(ref id) = self.endpoint_id
            && &record.endpoint_id != id
        {
            return false;
        }
        if let Some(event) = self.event
            && record.event != event
        {
            return false;
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}

// ============================================================================
// DeliveryLogStore trait
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write delivery record: {0}")]
    Write(String),

    #[error("Failed to read delivery records: {0}")]
    Read(String),
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Append one record. Records are never updated afterwards.
    async fn append(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Records matching `filter`, newest first.
    async fn query(&self, filter: &DeliveryQuery) -> Result<Vec<DeliveryRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

// ============================================================================
// InMemoryDeliveryLog
// ============================================================================

/// Bounded in-process log. Once `capacity` records are held, each append
/// evicts the oldest record.
#[derive(Debug, Clone)]
pub struct InMemoryDeliveryLog {
    records: Arc<Mutex<VecDeque<DeliveryRecord>>>,
    capacity: usize,
}

impl Default for InMemoryDeliveryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All retained records in insertion order (for test assertions).
    pub fn snapshot(&self) -> Vec<DeliveryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Records for one endpoint in insertion order.
    pub fn for_endpoint(&self, endpoint_id: &str) -> Vec<DeliveryRecord> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.endpoint_id == endpoint_id)
            .collect()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryDeliveryLog {
    async fn append(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Write(format!("InMemoryDeliveryLog lock poisoned: {e}")))?;

        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &DeliveryQuery) -> Result<Vec<DeliveryRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Read(format!("InMemoryDeliveryLog lock poisoned: {e}")))?;

        Ok(records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|e| StoreError::Read(format!("InMemoryDeliveryLog lock poisoned: {e}")))?
            .len())
    }
}
