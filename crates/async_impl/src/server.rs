//! WebSocket transport.
//!
//! Each connection is registered with the broadcaster and receives every
//! flushed batch as a `sensor-data-batch` text frame. The connection is torn
//! down when the socket closes, a send fails, or the broadcaster evicts the
//! subscriber for falling behind.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use common::{ClientMessage, ConnectionId, ServerEvent};

use crate::PipelineHandle;

pub struct ServerState {
    pipeline: PipelineHandle,
    started: Instant,
}

pub fn router(pipeline: PipelineHandle, allowed_origins: &[String]) -> Result<Router> {
    let state = Arc::new(ServerState {
        pipeline,
        started: Instant::now(),
    });
    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors_layer(allowed_origins)?)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    if allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(Any));
    }
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid allowed origin {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Binds `listen_addr` and serves until the listener fails.
pub async fn serve(listen_addr: &str, app: Router) -> Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    let local = listener.local_addr()?;
    info!("telemetry server listening on {local}");
    info!("  WebSocket: ws://{local}/ws");
    info!("  Health:    http://{local}/health");
    axum::serve(listener, app).await.context("server error")
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "subscribers": state.pipeline.subscriber_count(),
        "pending_snapshots": state.pipeline.pending_snapshots(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "diagnostics": state.pipeline.diagnostics(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (id, mut batches) = state.pipeline.connect();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            let payload = match serde_json::to_string(&ServerEvent::SensorDataBatch(batch)) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(connection = id, error = %err, "failed to encode batch");
                    continue;
                }
            };
            if sender.send(Message::Text(payload)).await.is_err() {
                debug!(connection = id, "websocket send failed");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_client_message(id, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    state.pipeline.disconnect(id);
}

/// Subscription requests are accepted but inert: every subscriber gets the
/// full global batch and there is no historical replay.
fn handle_client_message(id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe(sub)) => info!(
            connection = id,
            sensors = ?sub.sensor_ids,
            start = sub.start_time,
            "subscribe request ignored, streaming all sensors"
        ),
        Ok(ClientMessage::Unsubscribe(sub)) => info!(
            connection = id,
            sensors = ?sub.sensor_ids,
            "unsubscribe request ignored"
        ),
        Err(err) => debug!(connection = id, error = %err, "unparseable client message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_explicit_origins_build() {
        assert!(cors_layer(&["*".to_string()]).is_ok());
        assert!(cors_layer(&["http://localhost:4200".to_string()]).is_ok());
    }

    #[test]
    fn malformed_origin_is_rejected() {
        assert!(cors_layer(&["http://bad\norigin".to_string()]).is_err());
    }
}
