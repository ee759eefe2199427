use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::WebhookEvent;

/// Shortest shared secret accepted for an endpoint.
pub const MIN_SECRET_LEN: usize = 16;

/// Longest display name accepted for an endpoint.
pub const MAX_NAME_LEN: usize = 255;

/// A subscriber endpoint registered by an account owner.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEndpoint {
    pub id: String,

    pub name: String,

    pub url: String,

    /// Shared HMAC secret. Never serialized back out.
    #[serde(skip_serializing, default)]
    pub secret: String,

    pub events: HashSet<WebhookEvent>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WebhookEndpoint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            secret: secret.into(),
            events: HashSet::new(),
            active: true,
        }
    }

    pub fn subscribe_to(mut self, events: impl IntoIterator<Item = WebhookEvent>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn subscribe_all(self) -> Self {
        self.subscribe_to(WebhookEvent::ALL)
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Whether this endpoint should receive `event`.
    ///
    /// An empty event set receives nothing.
    pub fn matches_event(&self, event: WebhookEvent) -> bool {
        self.active && self.events.contains(&event)
    }

    /// Check the fields an endpoint must have to be deliverable.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidEndpoint {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.name.trim().is_empty() || self.name.chars().count() > MAX_NAME_LEN {
            return Err(invalid("name must be between 1 and 255 characters"));
        }
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(invalid("url must use http or https"));
        }
        if self.events.is_empty() {
            return Err(invalid("at least one event is required"));
        }
        if self.secret.chars().count() < MIN_SECRET_LEN {
            return Err(invalid("secret must be at least 16 characters"));
        }
        Ok(())
    }
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("secret", &"[REDACTED]")
            .field("events", &self.events)
            .field("active", &self.active)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Subscriber lookup failed: {0}")]
    Lookup(String),

    #[error("Invalid endpoint '{id}': {reason}")]
    InvalidEndpoint { id: String, reason: String },

    #[error("Failed to load endpoints from {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Read side of the subscriber store.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// All endpoints with `active == true`.
    async fn active_endpoints(&self) -> Result<Vec<WebhookEndpoint>, RegistryError>;
}

/// Registry kept in process memory, seeded at startup.
#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriberRegistry {
    endpoints: Arc<RwLock<Vec<WebhookEndpoint>>>,
}

impl InMemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from endpoints, rejecting any that fail validation.
    pub fn with_endpoints(endpoints: Vec<WebhookEndpoint>) -> Result<Self, RegistryError> {
        for endpoint in &endpoints {
            endpoint.validate()?;
        }
        Ok(Self {
            endpoints: Arc::new(RwLock::new(endpoints)),
        })
    }

    /// Load a JSON array of endpoints from `path`.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let load_error = |reason: String| RegistryError::Load {
            path: path.display().to_string(),
            reason,
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(e.to_string()))?;
        let endpoints: Vec<WebhookEndpoint> =
            serde_json::from_str(&raw).map_err(|e| load_error(e.to_string()))?;

        Self::with_endpoints(endpoints)
    }

    /// Insert or replace the endpoint with the same id.
    pub async fn upsert(&self, endpoint: WebhookEndpoint) -> Result<(), RegistryError> {
        endpoint.validate()?;

        let mut endpoints = self.endpoints.write().await;
        match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => endpoints.push(endpoint),
        }
        Ok(())
    }

    /// Mark an endpoint inactive. Returns `false` if the id is unknown.
    pub async fn deactivate(&self, id: &str) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.iter_mut().find(|e| e.id == id) {
            Some(endpoint) => {
                endpoint.deactivate();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriberRegistry for InMemorySubscriberRegistry {
    async fn active_endpoints(&self) -> Result<Vec<WebhookEndpoint>, RegistryError> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.iter().filter(|e| e.active).cloned().collect())
    }
}
