//! Broadcast fan-out.
//!
//! [`Broadcaster`] takes one inbound frame, decodes it, encodes it once and
//! queues the encoded frame on every connection in a registry snapshot,
//! the sender included. Recipients whose send fails are evicted; the
//! remaining deliveries carry on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::codec::{self, RelayMessage};
use super::{ConnectionId, Registry};
use crate::error::RelayError;

/// Fans messages out to every registered connection.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    stats: RelayStats,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued on.
    pub delivered: usize,
    /// Connections this broadcast removed after a failed send.
    pub evicted: Vec<ConnectionId>,
}

/// Monotonic relay counters.
#[derive(Debug, Default)]
struct RelayStats {
    messages_relayed: AtomicU64,
    frames_rejected: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages decoded and fanned out.
    pub messages_relayed: u64,
    /// Inbound frames dropped as malformed.
    pub frames_rejected: u64,
    /// Frames queued on recipients, summed over all broadcasts.
    pub deliveries: u64,
    /// Recipients removed after a failed send.
    pub evictions: u64,
}

impl Broadcaster {
    /// Creates a broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stats: RelayStats::default(),
        }
    }

    /// Decodes one raw frame from `origin` and broadcasts it.
    ///
    /// A malformed frame is logged and dropped. The origin connection is
    /// left untouched and nothing is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] for malformed frames, or
    /// [`RelayError::Encode`] if re-serialization fails.
    pub async fn relay(
        &self,
        origin: ConnectionId,
        raw: &[u8],
    ) -> Result<BroadcastReport, RelayError> {
        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(connection_id = %origin, error = %err, "dropping malformed frame");
                return Err(err);
            }
        };
        tracing::debug!(connection_id = %origin, bytes = raw.len(), "received message");
        tracing::trace!(connection_id = %origin, payload = %message.value(), "message payload");
        self.broadcast(&message).await
    }

    /// Delivers one decoded message to every connection currently
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if the message cannot be serialized.
    /// Per-recipient failures are not errors; they show up in
    /// [`BroadcastReport::evicted`].
    pub async fn broadcast(&self, message: &RelayMessage) -> Result<BroadcastReport, RelayError> {
        let frame = codec::encode(message)?;
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            tracing::trace!("no recipients registered");
        }

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for connection in &snapshot {
            match connection.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        peer = ?connection.peer_addr(),
                        error = %err,
                        "evicting unreachable recipient"
                    );
                    failed.push(connection.id());
                }
            }
        }
        report.evicted = self.evict(failed).await;
        tracing::debug!(
            recipients = snapshot.len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "broadcast complete"
        );

        self.stats.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Removes failed recipients from the registry.
    ///
    /// Returns only the ids this call actually removed: a connection that
    /// disconnected on its own, or was evicted by a concurrent broadcast,
    /// is not counted again.
    async fn evict(&self, failed: Vec<ConnectionId>) -> Vec<ConnectionId> {
        let mut evicted = Vec::with_capacity(failed.len());
        for id in failed {
            if self.registry.remove(id).await.is_some() {
                evicted.push(id);
            }
        }
        evicted
    }

    /// Returns the current relay counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_relayed: self.stats.messages_relayed.load(Ordering::Relaxed),
            frames_rejected: self.stats.frames_rejected.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}
