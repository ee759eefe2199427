mod handlers;
mod responses;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::outbound::webhook::{
    DeliveryLogStore, InMemoryDeliveryLog, InMemorySubscriberRegistry, WebhookDispatcher,
};
use crate::server::handlers::health::health_check;
use crate::server::handlers::webhooks::{create_secret, list_deliveries, list_events, trigger};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// The global application state shared between all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: WebhookDispatcher,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
}

impl AppState {
    /// Wire the in-memory registry and delivery log to a reqwest dispatcher.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = match &config.webhooks.endpoints_file {
            Some(path) => InMemorySubscriberRegistry::from_json_file(path)
                .await
                .wrap_err("Failed to load webhook endpoints")?,
            None => InMemorySubscriberRegistry::new(),
        };
        tracing::info!(endpoints = registry.len().await, "Webhook registry ready");

        let delivery_log: Arc<dyn DeliveryLogStore> = Arc::new(InMemoryDeliveryLog::with_capacity(
            config.webhooks.delivery_log_capacity,
        ));
        let dispatcher =
            WebhookDispatcher::from_config(&config.webhooks, Arc::new(registry), delivery_log.clone())
                .wrap_err("Failed to build webhook dispatcher")?;

        Ok(Self {
            dispatcher,
            delivery_log,
        })
    }
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    port: u16,
    dispatcher: WebhookDispatcher,
    shutdown_grace: Duration,
}

impl Server {
    /// Creates a new server with the default in-memory wiring.
    pub async fn new(config: &Config) -> Result<Self> {
        let state = AppState::from_config(config).await?;
        Self::with_state(config, state).await
    }

    /// Creates a new server around an existing state.
    pub async fn with_state(config: &Config, state: AppState) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

        let dispatcher = state.dispatcher.clone();

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/webhooks/events", get(list_events))
            .route("/webhooks/deliveries", get(list_deliveries))
            .route("/webhooks/trigger", post(trigger))
            .route("/webhooks/secret", post(create_secret))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            router,
            listener,
            port,
            dispatcher,
            shutdown_grace: config.webhooks.shutdown_grace(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Runs the server until a shutdown signal, then drains webhook deliveries.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped accepting requests");
        if !self.dispatcher.shutdown(self.shutdown_grace).await {
            tracing::warn!("Some webhook retries were cancelled at shutdown");
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
