// Webhook delivery module
//
// Leaf components:
//   hmac_signer, retry_strategy, schemas, subscription, delivery_log
//
// Pipeline:
//   http_client – one signed POST per attempt
//   recorder    – one delivery record per attempt
//   dispatcher  – fan-out and per-endpoint retry loops

pub mod delivery_log;
pub mod dispatcher;
pub mod hmac_signer;
pub mod http_client;
pub mod recorder;
pub mod retry_strategy;
pub mod schemas;
pub mod subscription;

// Re-export commonly used types
pub use delivery_log::{DeliveryLogStore, DeliveryQuery, DeliveryRecord, InMemoryDeliveryLog, StoreError};
pub use dispatcher::{DispatchReport, DispatcherError, EndpointDelivery, FanOut, WebhookDispatcher};
pub use hmac_signer::{
    HmacSigner, format_signature_header, generate_secret, parse_signature_header,
    verify_signature_header,
};
pub use http_client::{HttpClientError, WebhookHttpClient, WebhookTransport};
pub use recorder::DeliveryRecorder;
pub use retry_strategy::RetryStrategy;
pub use schemas::{DeliveryOutcome, DeliveryState, WebhookPayload};
pub use subscription::{InMemorySubscriberRegistry, RegistryError, SubscriberRegistry, WebhookEndpoint};
