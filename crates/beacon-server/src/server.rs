//! `BeaconServer`: Axum HTTP + `WebSocket` server in front of the hub.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use beacon_hub::Hub;
use beacon_hub::metrics::CONNECTIONS_REJECTED_TOTAL;
use beacon_hub::transport::{Credentials, RawConnection};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::websocket;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub connections are attached to.
    pub hub: Arc<Hub>,
    /// Listener limits.
    pub config: Arc<ServerConfig>,
    /// Upgraded sockets on their way to the hub's accept loop.
    pub intake: mpsc::Sender<RawConnection>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The main Beacon server.
pub struct BeaconServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    intake: mpsc::Sender<RawConnection>,
    metrics: PrometheusHandle,
}

impl BeaconServer {
    /// Create a server and start the hub's accept loop for it.
    pub fn new(config: ServerConfig, hub: Arc<Hub>, metrics: PrometheusHandle) -> Self {
        let (intake, acceptor) = websocket::intake(config.accept_backlog);
        hub.spawn_acceptor(acceptor);
        Self {
            config: Arc::new(config),
            hub,
            intake,
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            config: Arc::clone(&self.config),
            intake: self.intake.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until the hub starts draining.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let draining = self.hub.draining();

        let handle = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(draining.cancelled_owned())
            .await;
            match served {
                Ok(()) => info!("http server stopped"),
                Err(e) => error!(error = %e, "http server failed"),
            }
        });
        info!(%addr, "beacon server listening");
        Ok((addr, handle))
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Bearer token, for clients that cannot set headers.
    pub token: Option<String>,
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    if state.hub.is_shutting_down() {
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "hub is shutting down").into_response();
    }
    // Concurrent upgrades can overshoot by the number in flight.
    if state.hub.connection_count() >= state.config.max_connections {
        warn!(%remote_addr, max = state.config.max_connections, "connection limit reached");
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let credentials = Credentials {
        token: params.token.or_else(|| bearer_token(&headers)),
        remote_addr: Some(remote_addr),
    };
    let intake = state.intake.clone();
    ws.max_message_size(state.config.max_frame_size)
        .max_frame_size(state.config.max_frame_size)
        .on_upgrade(move |socket| hand_off(socket, credentials, intake))
}

async fn hand_off(socket: WebSocket, credentials: Credentials, intake: mpsc::Sender<RawConnection>) {
    let (reader, writer) = websocket::split(socket);
    debug!(remote_addr = ?credentials.remote_addr, "websocket upgraded");
    let raw = RawConnection {
        credentials,
        reader: Box::new(reader),
        writer: Box::new(writer),
    };
    if intake.send(raw).await.is_err() {
        debug!("accept loop stopped, dropping upgraded socket");
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(&state.hub))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}
