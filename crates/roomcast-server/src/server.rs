//! Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use roomcast_core::ConnectionId;
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::connection::ClientConnection;
use crate::protocol::ProtocolHandler;
use crate::registry::RoomRegistry;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub protocol: Arc<ProtocolHandler>,
    pub max_send_queue: usize,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(max_send_queue: usize) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let protocol = Arc::new(ProtocolHandler::new(Arc::clone(&registry)));
        Self {
            registry,
            protocol,
            max_send_queue,
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle holding the bound port.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(config.max_send_queue);
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Roomcast server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by [`start`]; keeps the accept loop alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Actor for one accepted connection: a writer task drains the outbound
/// queue into the sink while this task reads frames until the transport
/// closes, then runs disconnect cleanup exactly once.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(state.max_send_queue);
    let conn = Arc::new(ClientConnection::new(id.clone(), tx));
    state.registry.register(Arc::clone(&conn));
    tracing::info!(conn_id = %id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = frame.as_ref().clone();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => state.protocol.handle_frame(&id, text.as_str()),
            Message::Close(_) => break,
            // axum answers pings itself; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    conn.mark_closed();
    writer.abort();
    state.protocol.handle_disconnect(&id);
    tracing::info!(conn_id = %id, "WebSocket client disconnected");
}

/// Payload for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub uptime_secs: u64,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(AppState::new(32));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = build_router(AppState::new(32));

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_starts_on_random_port() {
        let config = ServerConfig::default(); // port 0 = auto-assign
        let handle = start(config).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
    }
}
