use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::domain::WebhookEvent;
use crate::outbound::webhook::delivery_log::DeliveryLogStore;
use crate::outbound::webhook::http_client::{HttpClientError, WebhookHttpClient, WebhookTransport};
use crate::outbound::webhook::recorder::DeliveryRecorder;
use crate::outbound::webhook::retry_strategy::RetryStrategy;
use crate::outbound::webhook::schemas::{DeliveryState, WebhookPayload};
use crate::outbound::webhook::subscription::{SubscriberRegistry, WebhookEndpoint};

/// Fans a domain event out to every subscribed endpoint.
///
/// Each matching endpoint gets its own task running an ordered retry loop:
/// attempt, record, then either stop on a 2xx or sleep and retry until the
/// [`RetryStrategy`] is exhausted. Loops for different endpoints run
/// concurrently and never affect each other.
///
/// Every task is spawned on a [`TaskTracker`] so that [`shutdown`] can wait
/// for in-flight deliveries. Pending retries can be stopped through a
/// [`CancellationToken`], either for all endpoints (shutdown) or for one
/// endpoint ([`cancel_endpoint`]).
///
/// [`shutdown`]: WebhookDispatcher::shutdown
/// [`cancel_endpoint`]: WebhookDispatcher::cancel_endpoint
#[derive(Clone)]
pub struct WebhookDispatcher {
    registry: Arc<dyn SubscriberRegistry>,

    recorder: DeliveryRecorder,

    transport: Arc<dyn WebhookTransport>,

    retry_strategy: RetryStrategy,

    tracker: TaskTracker,

    /// Parent of every endpoint token.
    shutdown: CancellationToken,

    /// Set once [`WebhookDispatcher::shutdown`] starts. Held while the
    /// tracker is closed or reopened.
    closing: Arc<Mutex<bool>>,

    /// Serializes concurrent drains.
    drain_lock: Arc<tokio::sync::Mutex<()>>,

    /// One token per endpoint with a running sequence, shared by all of
    /// that endpoint's sequences.
    endpoint_tokens: Arc<Mutex<HashMap<String, Arc<CancellationToken>>>>,
}

/// Final state of one endpoint's delivery sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDelivery {
    pub endpoint_id: String,
    pub state: DeliveryState,
    pub attempts: u32,
}

/// Result of an awaited [`WebhookDispatcher::dispatch`].
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub event: WebhookEvent,
    pub deliveries: Vec<EndpointDelivery>,
}

impl DispatchReport {
    pub fn matched(&self) -> usize {
        self.deliveries.len()
    }

    pub fn count(&self, state: DeliveryState) -> usize {
        self.deliveries.iter().filter(|d| d.state == state).count()
    }

    pub fn delivery(&self, endpoint_id: &str) -> Option<&EndpointDelivery> {
        self.deliveries.iter().find(|d| d.endpoint_id == endpoint_id)
    }
}

/// Handles to the per-endpoint tasks started by one fan-out.
///
/// Dropping it leaves the tasks running in the background.
#[derive(Debug)]
pub struct FanOut {
    event: WebhookEvent,
    handles: Vec<(String, JoinHandle<EndpointDelivery>)>,
}

impl FanOut {
    pub fn matched(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every endpoint's sequence to reach a terminal state.
    pub async fn join(self) -> DispatchReport {
        let mut deliveries = Vec::with_capacity(self.handles.len());

        for (endpoint_id, handle) in self.handles {
            match handle.await {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => {
                    error!(endpoint_id = %endpoint_id, error = %e, "Delivery task failed");
                    deliveries.push(EndpointDelivery {
                        endpoint_id,
                        state: DeliveryState::Cancelled,
                        attempts: 0,
                    });
                }
            }
        }

        DispatchReport {
            event: self.event,
            deliveries,
        }
    }
}

impl WebhookDispatcher {
    /// Create a dispatcher with the default retry schedule.
    pub fn new(
        registry: Arc<dyn SubscriberRegistry>,
        store: Arc<dyn DeliveryLogStore>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            registry,
            recorder: DeliveryRecorder::new(store),
            transport,
            retry_strategy: RetryStrategy::default(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            closing: Arc::new(Mutex::new(false)),
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
            endpoint_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a dispatcher backed by a reqwest transport configured from `config`.
    pub fn from_config(
        config: &WebhookConfig,
        registry: Arc<dyn SubscriberRegistry>,
        store: Arc<dyn DeliveryLogStore>,
    ) -> Result<Self, DispatcherError> {
        let client = WebhookHttpClient::with_timeout(config.timeout())?
            .with_body_limit(config.response_body_limit);

        let dispatcher = Self::new(registry, store, Arc::new(client))
            .with_retry_strategy(config.retry_strategy())
            .with_body_limit(config.response_body_limit);

        Ok(dispatcher)
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Cap on response bodies stored in delivery records.
    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.recorder = self.recorder.with_body_limit(body_limit);
        self
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    /// Number of delivery tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Deliver `event` in the background.
    ///
    /// Returns immediately. Nothing about the delivery, including registry
    /// failures, is reported back to the caller.
    pub fn trigger(&self, event: WebhookEvent, data: Map<String, Value>) {
        if self.is_closing() {
            warn!(event = %event, "Dispatcher is shutting down, trigger dropped");
            return;
        }

        let dispatcher = self.clone();
        self.tracker.spawn(async move {
            dispatcher.fan_out(event, data).await;
        });
    }

    /// Deliver `event` and wait for every endpoint to finish.
    pub async fn dispatch(&self, event: WebhookEvent, data: Map<String, Value>) -> DispatchReport {
        self.fan_out(event, data).await.join().await
    }

    /// Look up matching endpoints and start one delivery task per endpoint.
    pub async fn fan_out(&self, event: WebhookEvent, data: Map<String, Value>) -> FanOut {
        let mut fan_out = FanOut {
            event,
            handles: Vec::new(),
        };

        let endpoints = match self.registry.active_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!(event = %event, error = %e, "Failed to fetch webhook endpoints");
                return fan_out;
            }
        };

        let matching: Vec<WebhookEndpoint> = endpoints
            .into_iter()
            .filter(|endpoint| endpoint.matches_event(event))
            .collect();

        if matching.is_empty() {
            debug!(event = %event, "No endpoints subscribed to event");
            return fan_out;
        }

        // One payload, one timestamp, shared by every endpoint of this trigger.
        let payload = Arc::new(WebhookPayload::new(event, data));
        let payload_json = Arc::new(serde_json::to_value(payload.as_ref()).unwrap_or_else(|e| {
            error!(event = %event, error = %e, "Failed to serialize webhook payload for the delivery log");
            Value::Null
        }));

        info!(event = %event, endpoint_count = matching.len(), "Dispatching webhook");

        for endpoint in matching {
            let dispatcher = self.clone();
            let payload = payload.clone();
            let payload_json = payload_json.clone();
            let cancel = self.endpoint_token(&endpoint.id);
            let endpoint_id = endpoint.id.clone();

            let handle = self.tracker.spawn(async move {
                let delivery = dispatcher
                    .deliver_to_endpoint(&endpoint, &payload, &payload_json, &cancel)
                    .await;
                dispatcher.release_endpoint_token(&endpoint.id, cancel);
                delivery
            });
            fan_out.handles.push((endpoint_id, handle));
        }

        fan_out
    }

    /// Stop pending retries for one endpoint.
    ///
    /// An attempt already on the wire still runs to completion or timeout.
    /// Later triggers deliver to the endpoint again. Returns `false` if no
    /// sequence for the endpoint is running.
    pub fn cancel_endpoint(&self, endpoint_id: &str) -> bool {
        let token = self
            .endpoint_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(endpoint_id);

        match token {
            Some(token) => {
                info!(endpoint_id = %endpoint_id, "Cancelling pending webhook retries");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until every in-flight delivery reaches a terminal state.
    ///
    /// Triggers keep being accepted, and deliveries they start while the
    /// drain is in progress are waited for too.
    pub async fn drain(&self) {
        let _drain = self.drain_lock.lock().await;

        self.tracker.close();
        self.tracker.wait().await;

        // Reopen under the same lock shutdown closes under, so a reopen can
        // never undo a shutdown.
        let closing = self.lock_closing();
        if !*closing {
            self.tracker.reopen();
        }
    }

    /// Stop accepting triggers and wait for in-flight deliveries.
    ///
    /// Waits up to `grace` for every sequence to finish, then cancels the
    /// remaining retries and waits for the attempts still on the wire.
    /// Returns `true` if everything finished within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        {
            let mut closing = self.lock_closing();
            *closing = true;
            self.tracker.close();
        }
        info!(in_flight = self.tracker.len(), "Draining webhook deliveries");

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("Webhook deliveries drained");
            return true;
        }

        warn!(
            in_flight = self.tracker.len(),
            "Shutdown grace period elapsed, cancelling pending retries"
        );
        self.shutdown.cancel();
        self.tracker.wait().await;
        false
    }

    fn is_closing(&self) -> bool {
        *self.lock_closing()
    }

    fn lock_closing(&self) -> std::sync::MutexGuard<'_, bool> {
        self.closing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CancellationToken>>> {
        self.endpoint_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn endpoint_token(&self, endpoint_id: &str) -> Arc<CancellationToken> {
        self.lock_tokens()
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Arc::new(self.shutdown.child_token()))
            .clone()
    }

    /// Drop a finished sequence's token, removing the map entry once no
    /// sequence for the endpoint is left.
    ///
    /// Tokens are only cloned and released under the map lock, so the strong
    /// count of a mapped token equals its running sequences plus one.
    fn release_endpoint_token(&self, endpoint_id: &str, token: Arc<CancellationToken>) {
        let mut tokens = self.lock_tokens();

        let is_current = tokens
            .get(endpoint_id)
            .is_some_and(|current| Arc::ptr_eq(current, &token));
        drop(token);

        if is_current
            && tokens
                .get(endpoint_id)
                .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            tokens.remove(endpoint_id);
        }
    }

    #[cfg(test)]
    fn tracked_endpoints(&self) -> usize {
        self.lock_tokens().len()
    }

    /// Run the retry loop for one endpoint.
    ///
    /// Attempts are strictly ordered: attempt N+1 starts only after attempt N
    /// has been recorded.
    async fn deliver_to_endpoint(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
        payload_json: &Value,
        cancel: &CancellationToken,
    ) -> EndpointDelivery {
        let event = payload.event;
        let mut sequence = Sequence::new(&endpoint.id);

        if cancel.is_cancelled() {
            sequence.advance(DeliveryState::Cancelled);
            return sequence.finish();
        }

        loop {
            sequence.advance(DeliveryState::Attempting);
            let retry_count = sequence.attempts - 1;

            let outcome = self
                .transport
                .deliver(&endpoint.url, payload, &endpoint.secret)
                .await;

            self.recorder
                .record(&endpoint.id, event, payload_json, &outcome, retry_count)
                .await;

            if outcome.is_success() {
                info!(
                    endpoint_id = %endpoint.id,
                    endpoint_name = %endpoint.name,
                    event = %event,
                    status = outcome.status,
                    retry_count = retry_count,
                    "Webhook delivered successfully"
                );
                sequence.advance(DeliveryState::Succeeded);
                return sequence.finish();
            }

            if !self.retry_strategy.should_retry(retry_count) {
                warn!(
                    endpoint_id = %endpoint.id,
                    endpoint_name = %endpoint.name,
                    event = %event,
                    status = outcome.status,
                    max_retries = self.retry_strategy.max_retries(),
                    "Webhook delivery failed after all retries"
                );
                sequence.advance(DeliveryState::Exhausted);
                return sequence.finish();
            }

            let delay = self
                .retry_strategy
                .next_delay(retry_count + 1)
                .unwrap_or_default();

            warn!(
                endpoint_id = %endpoint.id,
                event = %event,
                status = outcome.status,
                error = outcome.error.as_deref().unwrap_or(""),
                retry_count = retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                "Webhook delivery failed, will retry"
            );
            sequence.advance(DeliveryState::RetryScheduled);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        endpoint_id = %endpoint.id,
                        event = %event,
                        attempts = sequence.attempts,
                        "Webhook retries cancelled"
                    );
                    sequence.advance(DeliveryState::Cancelled);
                    return sequence.finish();
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Live state of one endpoint's delivery sequence.
struct Sequence<'a> {
    endpoint_id: &'a str,
    state: DeliveryState,
    attempts: u32,
}

impl<'a> Sequence<'a> {
    fn new(endpoint_id: &'a str) -> Self {
        Self {
            endpoint_id,
            state: DeliveryState::Pending,
            attempts: 0,
        }
    }

    fn advance(&mut self, next: DeliveryState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid delivery transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            endpoint_id = %self.endpoint_id,
            from = ?self.state,
            to = ?next,
            attempts = self.attempts,
            "Delivery state changed"
        );

        if next == DeliveryState::Attempting {
            self.attempts += 1;
        }
        self.state = next;
    }

    fn finish(self) -> EndpointDelivery {
        EndpointDelivery {
            endpoint_id: self.endpoint_id.to_string(),
            state: self.state,
            attempts: self.attempts,
        }
    }
}

/// Errors that can occur while building a [`WebhookDispatcher`].
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("Failed to build webhook transport: {0}")]
    Transport(#[from] HttpClientError),
}
