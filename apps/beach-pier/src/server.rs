//! HTTP surface: the `/ws` bridge endpoint plus status and debug routes.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::protocol::ServerMessage;
use crate::rpc::{Dialer, TcpDialer};
use crate::session::{RegistryStats, SessionRegistration, SessionRegistry};

pub const READY_NOTICE: &str = "WebSocket connected. Please provide Neovim server address.";

pub struct AppState {
    registry: SessionRegistry,
    dialer: Arc<dyn Dialer>,
    metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(
        registry: SessionRegistry,
        dialer: Arc<dyn Dialer>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            registry,
            dialer,
            metrics,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: RegistryStats,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let registry = SessionRegistry::new(config.session_config());
    let dialer = Arc::new(TcpDialer {
        dial_timeout: config.dial_timeout,
        call_timeout: config.call_timeout,
    });
    let state = Arc::new(AppState::new(registry, dialer, metrics));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;

    info!("beach-pier listening on {}", config.listen_addr);

    let graceful = axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal());
    graceful.await.context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "running",
        stats: state.registry.stats(),
    })
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let SessionRegistration {
        session,
        mut receiver,
    } = state.registry.register(Arc::clone(&state.dialer));
    let session_id = session.id();
    info!(session_id = %session_id, "client connected");

    let ready = ServerMessage::Ready {
        data: READY_NOTICE.to_string(),
    };
    if let Err(err) = send_json(&mut ws_tx, &ready).await {
        warn!(session_id = %session_id, error = %err, "failed to greet client");
        session.close().await;
        return;
    }

    let writer_session = Arc::clone(&session);
    let writer = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if let Err(err) = send_json(&mut ws_tx, &message).await {
                debug!(session_id = %writer_session.id(), error = %err, "client write failed");
                writer_session.close().await;
                break;
            }
        }
        debug!(session_id = %writer_session.id(), "writer task finished");
    });

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "binary frame is not utf-8");
                    break;
                }
            },
            Ok(Message::Close(frame)) => {
                info!(
                    session_id = %session_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "error receiving message");
                break;
            }
        };

        if let Err(err) = session.handle_frame(&text).await {
            warn!(session_id = %session_id, error = %err, "malformed client frame; closing");
            break;
        }
    }

    session.close().await;
    writer.abort();
    info!(session_id = %session_id, "client disconnected");
}

async fn send_json<S>(sink: &mut S, message: &ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: std::error::Error + Send + Sync + 'static,
{
    let payload = serde_json::to_string(message).context("failed to encode server message")?;
    sink.send(Message::Text(payload))
        .await
        .context("failed to send websocket frame")?;
    Ok(())
}
