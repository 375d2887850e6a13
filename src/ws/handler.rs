//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::transport::PeerAddr;

/// `GET <ws_path>`: upgrade the HTTP connection to a relay WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(PeerAddr(peer)): ConnectInfo<PeerAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max = state.config.max_message_bytes;
    let tasks = state.tasks.clone();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(move |err| {
            tracing::debug!(peer = %peer, error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| tasks.track_future(run_connection(socket, peer, state)))
}
