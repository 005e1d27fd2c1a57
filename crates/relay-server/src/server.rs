//! `RelayServer`: Axum HTTP + `WebSocket` ingress around the relay core.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_settings::RelaySettings;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::health::{self, HealthResponse};
use crate::rate_limit::{self, RateLimiter};
use crate::relay::Relay;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{self, SocketConfig};

/// Response message for an accepted producer submission.
pub const ITEM_ACCEPTED_MESSAGE: &str = "New print data received and broadcasted.";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay core.
    pub relay: Arc<Relay>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Per-socket limits.
    pub socket: SocketConfig,
}

/// The relay server.
pub struct RelayServer {
    settings: RelaySettings,
    relay: Arc<Relay>,
    limiter: Arc<RateLimiter>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server from settings.
    pub fn new(settings: RelaySettings, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            relay: Arc::new(Relay::from_settings(&settings)),
            limiter: Arc::new(RateLimiter::from_settings(&settings.ingress)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
            settings,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: Arc::clone(&self.relay),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            socket: SocketConfig {
                max_message_size: self.settings.server.max_message_size,
                send_queue_capacity: self.settings.server.send_queue_capacity,
            },
        };

        let producers = Router::new()
            .route("/items", post(submit_item))
            .route("/new-print-data", post(submit_item))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.limiter),
                rate_limit::limit_producers,
            ))
            .layer(DefaultBodyLimit::max(self.settings.ingress.max_body_bytes));

        Router::new()
            .route("/", get(websocket::upgrade))
            .route("/ws", get(websocket::upgrade))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(producers)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
            .layer(security_header(header::X_FRAME_OPTIONS, "SAMEORIGIN"))
            .layer(security_header(header::REFERRER_POLICY, "no-referrer"))
            .layer(security_header(header::X_DNS_PREFETCH_CONTROL, "off"))
    }

    /// Bind, spawn the keepalive loops, and serve until shutdown.
    ///
    /// Returns the bound address and the server task. On shutdown every
    /// consumer connection is closed.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let token = self.shutdown.token();
        let keepalive = self.relay.keepalive().spawn(&token);

        let router = self.router();
        let relay = Arc::clone(&self.relay);
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                    let _ = relay.close_all();
                });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            for task in keepalive {
                let _ = task.await;
            }
        });

        info!(%local_addr, "relay server listening");
        Ok((local_addr, handle))
    }

    /// Relay core.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Settings the server was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.relay.registry();
    Json(health::health_check(
        state.start_time,
        registry.len(),
        registry.bound_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /items, POST /new-print-data
async fn submit_item(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let report = state.relay.on_producer_item(body);
    Json(json!({
        "message": ITEM_ACCEPTED_MESSAGE,
        "delivered": report.delivered,
    }))
}
