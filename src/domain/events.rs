use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every domain event a webhook endpoint can subscribe to.
///
/// Serialized with the dotted wire names (`document.created`, ...), which are
/// also what subscribers list in their event sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "document.created")]
    DocumentCreated,
    #[serde(rename = "document.updated")]
    DocumentUpdated,
    #[serde(rename = "document.deleted")]
    DocumentDeleted,

    #[serde(rename = "qr_code.created")]
    QrCodeCreated,
    #[serde(rename = "qr_code.updated")]
    QrCodeUpdated,
    #[serde(rename = "qr_code.deleted")]
    QrCodeDeleted,
    #[serde(rename = "qr_code.scanned")]
    QrCodeScanned,

    #[serde(rename = "customer.created")]
    CustomerCreated,
    #[serde(rename = "customer.updated")]
    CustomerUpdated,
    #[serde(rename = "customer.deleted")]
    CustomerDeleted,

    #[serde(rename = "subscription.created")]
    SubscriptionCreated,
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated,
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled,
}

impl WebhookEvent {
    pub const ALL: [WebhookEvent; 13] = [
        WebhookEvent::DocumentCreated,
        WebhookEvent::DocumentUpdated,
        WebhookEvent::DocumentDeleted,
        WebhookEvent::QrCodeCreated,
        WebhookEvent::QrCodeUpdated,
        WebhookEvent::QrCodeDeleted,
        WebhookEvent::QrCodeScanned,
        WebhookEvent::CustomerCreated,
        WebhookEvent::CustomerUpdated,
        WebhookEvent::CustomerDeleted,
        WebhookEvent::SubscriptionCreated,
        WebhookEvent::SubscriptionUpdated,
        WebhookEvent::SubscriptionCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::DocumentCreated => "document.created",
            WebhookEvent::DocumentUpdated => "document.updated",
            WebhookEvent::DocumentDeleted => "document.deleted",
            WebhookEvent::QrCodeCreated => "qr_code.created",
            WebhookEvent::QrCodeUpdated => "qr_code.updated",
            WebhookEvent::QrCodeDeleted => "qr_code.deleted",
            WebhookEvent::QrCodeScanned => "qr_code.scanned",
            WebhookEvent::CustomerCreated => "customer.created",
            WebhookEvent::CustomerUpdated => "customer.updated",
            WebhookEvent::CustomerDeleted => "customer.deleted",
            WebhookEvent::SubscriptionCreated => "subscription.created",
            WebhookEvent::SubscriptionUpdated => "subscription.updated",
            WebhookEvent::SubscriptionCancelled => "subscription.cancelled",
        }
    }

    /// Resource part of the name (`"qr_code.scanned"` -> `"qr_code"`).
    pub fn resource(&self) -> &'static str {
        let name = self.as_str();
        name.split_once('.').map_or(name, |(resource, _)| resource)
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown webhook event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for WebhookEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WebhookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}
