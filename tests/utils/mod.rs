#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cenety_webhooks::config::Config;
use cenety_webhooks::domain::WebhookEvent;
use cenety_webhooks::outbound::webhook::{
    InMemoryDeliveryLog, InMemorySubscriberRegistry, RetryStrategy, WebhookDispatcher,
    WebhookEndpoint, WebhookHttpClient,
};
use cenety_webhooks::server::{AppState, Server};
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

/// Per-attempt timeout used by test dispatchers.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Short backoff so retry tests finish quickly.
pub const TEST_DELAYS_MS: [u64; 3] = [10, 20, 30];

fn test_config() -> Config {
    let mut config = Config::load().unwrap();
    config.server.host = "localhost".to_string();
    config.server.port = 0;
    config.webhooks.endpoints_file = None;
    config
}

pub async fn spawn_server() -> String {
    let config = test_config();

    let server = Server::new(&config).await.unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    format!("http://{}:{}", config.server.host, port)
}

pub struct TestApp {
    pub addr: String,
    pub dispatcher: WebhookDispatcher,
    pub delivery_log: InMemoryDeliveryLog,
}

/// Dispatcher over real HTTP with a short timeout and short backoff.
pub fn test_dispatcher(endpoints: Vec<WebhookEndpoint>) -> (WebhookDispatcher, InMemoryDeliveryLog) {
    let registry = InMemorySubscriberRegistry::with_endpoints(endpoints).unwrap();
    let delivery_log = InMemoryDeliveryLog::new();
    let client = WebhookHttpClient::with_timeout(TEST_TIMEOUT).unwrap();

    let dispatcher = WebhookDispatcher::new(
        Arc::new(registry),
        Arc::new(delivery_log.clone()),
        Arc::new(client),
    )
    .with_retry_strategy(RetryStrategy::from_millis(3, &TEST_DELAYS_MS));

    (dispatcher, delivery_log)
}

pub async fn spawn_app(endpoints: Vec<WebhookEndpoint>) -> TestApp {
    let config = test_config();
    let (dispatcher, delivery_log) = test_dispatcher(endpoints);

    let state = AppState {
        dispatcher: dispatcher.clone(),
        delivery_log: Arc::new(delivery_log.clone()),
    };
    let server = Server::with_state(&config, state).await.unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    TestApp {
        addr: format!("http://{}:{}", config.server.host, port),
        dispatcher,
        delivery_log,
    }
}

pub fn endpoint(id: &str, url: String, secret: &str, events: &[WebhookEvent]) -> WebhookEndpoint {
    WebhookEndpoint::new(id, format!("Endpoint {id}"), url, secret).subscribe_to(events.iter().copied())
}

/// Poll until `f` holds or two seconds pass.
pub async fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    response_body: String,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
            response_body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = body.into();
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code).set_body_string(self.response_body.clone())
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code: 500,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let attempt = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}
