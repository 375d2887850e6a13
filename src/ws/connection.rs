//! WebSocket connection driver.
//!
//! Splits one socket into a reader, which feeds inbound frames to the
//! [`Broadcaster`], and a writer task, which is the only owner of the
//! sink and drains the connection's [`Outbound`] queue. Either side
//! ending closes the connection and removes it from the registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::app_state::AppState;
use crate::domain::{Broadcaster, Connection, ConnectionId, ConnectionState, Outbound};

/// Upper bound on waiting for the peer to take our Close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs one client from upgrade to disconnect.
///
/// - Registers a new [`Connection`] for the socket.
/// - Relays every inbound text or binary frame.
/// - Removes the connection when the peer disconnects, the transport
///   fails, or a broadcast evicts it.
pub async fn run_connection(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (connection, outbound) = Connection::open(
        ConnectionId::new(),
        Some(peer),
        state.config.outbound_queue_capacity,
    );
    let id = connection.id();

    if let Err(err) = state.registry.add(Arc::clone(&connection)).await {
        if err.is_fatal() {
            tracing::error!(
                connection_id = %id,
                peer = %peer,
                error = %err,
                "failed to register connection"
            );
        } else {
            tracing::debug!(
                connection_id = %id,
                peer = %peer,
                error = %err,
                "client left before registration"
            );
        }
        connection.close();
        return;
    }
    tracing::info!(connection_id = %id, peer = %peer, "client connected");

    let (sink, stream) = socket.split();
    let writer = state
        .tasks
        .spawn(write_loop(sink, outbound, Arc::clone(&connection)));

    read_loop(stream, &connection, &state.broadcaster).await;

    state.registry.remove(id).await;
    // Covers the rare path where the entry was already gone.
    connection.close();
    if let Err(err) = writer.await {
        tracing::warn!(connection_id = %id, error = %err, "writer task failed");
    }

    let connected_ms = (chrono::Utc::now() - connection.connected_at()).num_milliseconds();
    tracing::info!(connection_id = %id, peer = %peer, connected_ms, "client disconnected");
}

/// Reads frames until the peer disconnects or the connection is closed
/// from elsewhere.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    connection: &Connection,
    broadcaster: &Broadcaster,
) {
    let id = connection.id();
    let mut lifecycle = connection.watch_state();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        // Malformed frames are logged by the broadcaster and
                        // leave the connection open.
                        let _ = broadcaster.relay(id, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = broadcaster.relay(id, &data).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %id, error = %err, "websocket read failed");
                        break;
                    }
                }
            }
            // The watch guard must not outlive this arm.
            () = async {
                let _ = lifecycle.wait_for(|s| *s != ConnectionState::Open).await;
            } => break,
        }
    }
}

/// Writes queued frames until the connection leaves `Open`, then sends a
/// best-effort Close frame and drops the sink.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: Outbound,
    connection: Arc<Connection>,
) {
    let id = connection.id();
    while let Some(frame) = outbound.next().await {
        if let Err(err) = sink.send(Message::Text(frame)).await {
            tracing::debug!(connection_id = %id, error = %err, "websocket write failed");
            // Wakes the reader so the connection is deregistered.
            connection.begin_close();
            return;
        }
    }

    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(""),
    }));
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.send(close))
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %id, "peer did not accept close frame in time");
    }
}
