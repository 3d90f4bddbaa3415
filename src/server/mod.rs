//! Dashboard WebSocket server
//!
//! Serves `/ws` with axum; every connected client receives the broadcast
//! egress stream as `{type, data, now}` JSON, throttled by its own token
//! bucket. Lagging clients observe drops rather than back-pressuring the
//! pipeline.

pub mod messages;
mod rate_limit;

pub use messages::{Envelope, ErrorUi, OrderBookUi, Payload, PriceLevelUi, TradeUi};
pub use rate_limit::ClientRateLimiter;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ServerConfig};
use crate::metrics::PipelineMetrics;

#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<Payload>,
    pub engine_config: Arc<EngineConfig>,
    pub server_config: ServerConfig,
    pub metrics: Arc<PipelineMetrics>,
}

/// Build the dashboard router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the task is cancelled
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.server_config.bind_address, state.server_config.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Dashboard WebSocket server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, state))
}

async fn handle_client(mut socket: WebSocket, state: AppState) {
    let mut rx = state.bus.subscribe();
    let limiter = ClientRateLimiter::new(state.server_config.client_messages_per_sec);

    // Clients bootstrap from the active configuration.
    let hello = Envelope::new(
        Payload::RuntimeConfig(Box::new((*state.engine_config).clone())),
        chrono::Utc::now().timestamp_millis(),
    );
    if let Ok(text) = serde_json::to_string(&hello) {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    info!("Dashboard client connected");

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(payload) => {
                        if !limiter.check() {
                            state.metrics.record_egress_rate_limited();
                            continue;
                        }
                        let envelope =
                            Envelope::new(payload, chrono::Utc::now().timestamp_millis());
                        let text = match serde_json::to_string(&envelope) {
                            Ok(text) => text,
                            Err(error) => {
                                warn!(error = %error, "Failed to serialize egress message");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            debug!("Dashboard client send failed; closing");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dashboard client lagged; messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Dashboard client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // The dashboard stream is one-way; inbound text is ignored.
                    }
                    Some(Err(error)) => {
                        debug!(error = %error, "Dashboard client socket error");
                        break;
                    }
                }
            }
        }
    }
}
