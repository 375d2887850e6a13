//! Connection handle and lifecycle state machine.
//!
//! A [`Connection`] is the registry-facing half of one client. The
//! transport-facing half is the [`Outbound`] queue handed to the writer
//! task, which is the only code that ever touches the socket sink. Sends
//! from any number of broadcasting tasks are therefore serialized through
//! one bounded queue per connection.
//!
//! # Lifecycle
//!
//! ```text
//! Open ──► Closing ──► Closed
//!   └──────────────────▲
//! ```
//!
//! Transitions are monotonic. Every transition goes through a single
//! [`tokio::sync::watch`] channel, so racing close paths agree on exactly
//! one winner.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::ConnectionId;
use crate::error::RelayError;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Accepting frames.
    Open,
    /// A send failed or the peer went away; awaiting registry removal.
    Closing,
    /// Terminal. No further sends are attempted.
    Closed,
}

/// Shared handle to one connected client.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Utf8Bytes>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Creates an `Open` connection with an outbound queue of `capacity`
    /// frames. Returns the shared handle and the receiving end that the
    /// writer task drains.
    ///
    /// A `capacity` of zero is treated as one.
    #[must_use]
    pub fn open(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Arc<Self>, Outbound) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state, state_rx) = watch::channel(ConnectionState::Open);
        let connection = Arc::new(Self {
            id,
            peer_addr,
            connected_at: Utc::now(),
            outbound: tx,
            state,
        });
        let outbound = Outbound {
            frames: rx,
            state: state_rx,
        };
        (connection, outbound)
    }

    /// Returns the connection identity.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address, when the transport reported one.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns when the connection was accepted.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns `true` while the connection accepts frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queues one encoded frame for delivery.
    ///
    /// Never waits on the peer: a full queue means the peer is not keeping
    /// up, and it is treated as a transport failure. Any failure moves the
    /// connection to [`ConnectionState::Closing`]; the caller is expected
    /// to remove it from the registry.
    ///
    /// # Errors
    ///
    /// - [`RelayError::TransportClosed`] if the connection already left
    ///   `Open` or the writer has gone away.
    /// - [`RelayError::TransportError`] if the outbound queue is full.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::TransportClosed(self.id));
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.begin_close();
                Err(RelayError::TransportClosed(self.id))
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.begin_close();
                Err(RelayError::TransportError {
                    connection_id: self.id,
                    reason: "outbound queue full".to_string(),
                })
            }
        }
    }

    /// Moves `Open` to `Closing`. Returns `true` if this call made the
    /// transition.
    pub fn begin_close(&self) -> bool {
        self.transition(ConnectionState::Closing)
    }

    /// Moves the connection to `Closed` and signals the reader and writer
    /// tasks to release the socket.
    ///
    /// Idempotent: returns `true` only for the one call that performed the
    /// transition, however many paths race to close.
    pub fn close(&self) -> bool {
        let closed = self.transition(ConnectionState::Closed);
        if closed {
            tracing::debug!(connection_id = %self.id, "connection closed");
        }
        closed
    }

    /// Returns a receiver that observes every lifecycle transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, to: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if *current < to {
                *current = to;
                true
            } else {
                false
            }
        })
    }
}

/// Receiving end of a connection's outbound queue.
///
/// Owned by the writer task. Yields frames until the connection leaves
/// `Open` or every [`Connection`] handle has been dropped.
#[derive(Debug)]
pub struct Outbound {
    frames: mpsc::Receiver<Utf8Bytes>,
    state: watch::Receiver<ConnectionState>,
}

impl Outbound {
    /// Waits for the next frame to write.
    ///
    /// Returns `None` once the connection is no longer `Open`; frames still
    /// queued at that point are discarded.
    pub async fn next(&mut self) -> Option<Utf8Bytes> {
        if *self.state.borrow() != ConnectionState::Open {
            return None;
        }
        tokio::select! {
            biased;
            () = async {
                let _ = self.state.wait_for(|s| *s != ConnectionState::Open).await;
            } => None,
            frame = self.frames.recv() => frame,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn frame(text: &str) -> Utf8Bytes {
        Utf8Bytes::from(text.to_string())
    }

    #[test]
    fn starts_open() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 4);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.is_open());
        assert!(conn.peer_addr().is_none());
    }

    #[tokio::test]
    async fn send_reaches_outbound() {
        let (conn, mut out) = Connection::open(ConnectionId::new(), None, 4);
        assert_ok!(conn.send(frame("1")));
        assert_ok!(conn.send(frame("2")));
        assert_eq!(out.next().await.as_deref(), Some("1"));
        assert_eq!(out.next().await.as_deref(), Some("2"));
    }

    #[test]
    fn full_queue_is_transport_error() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 1);
        assert_ok!(conn.send(frame("1")));
        let Err(err) = conn.send(frame("2")) else {
            panic!("expected queue-full failure");
        };
        assert!(matches!(err, RelayError::TransportError { .. }));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn dropped_writer_is_transport_closed() {
        let (conn, out) = Connection::open(ConnectionId::new(), None, 4);
        drop(out);
        let Err(err) = conn.send(frame("1")) else {
            panic!("expected closed failure");
        };
        assert!(matches!(err, RelayError::TransportClosed(id) if id == conn.id()));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 4);
        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn transitions_are_monotonic() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 4);
        assert!(conn.begin_close());
        assert!(!conn.begin_close());
        assert!(conn.close());
        assert!(!conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn no_send_after_close() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 4);
        conn.close();
        assert_err!(conn.send(frame("late")));
    }

    #[tokio::test]
    async fn outbound_stops_on_close() {
        let (conn, mut out) = Connection::open(ConnectionId::new(), None, 4);
        assert_ok!(conn.send(frame("queued")));
        conn.close();
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn outbound_wakes_when_closed_while_waiting() {
        let (conn, mut out) = Connection::open(ConnectionId::new(), None, 4);
        let waiter = tokio::spawn(async move { out.next().await });
        tokio::task::yield_now().await;
        conn.close();
        let Ok(next) = waiter.await else {
            panic!("writer task panicked");
        };
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn concurrent_close_has_one_winner() {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 4);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let conn = Arc::clone(&conn);
            handles.push(tokio::spawn(async move { conn.close() }));
        }
        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
