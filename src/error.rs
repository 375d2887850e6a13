//! Relay error types.
//!
//! [`RelayError`] is the central error type for the relay. Per-message
//! failures (decode, transport) are recovered where they happen and never
//! tear down more than the single connection involved; the remaining
//! variants only surface at startup or on invariant violations.

use crate::domain::ConnectionId;

/// Server-side error enum.
///
/// # Recovery
///
/// | Variant                               | Handling                                  |
/// |---------------------------------------|-------------------------------------------|
/// | `Decode`                              | frame dropped, sender stays connected     |
/// | `TransportClosed` / `TransportError`  | recipient removed from the registry       |
/// | `DuplicateIdentity`                   | logic error, offending connection closed  |
/// | `Encode` / `Config` / `Tls` / `Io`    | propagated to the caller                  |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Inbound frame is not well-formed JSON.
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// A decoded message could not be serialized again.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The peer is gone; the connection no longer accepts frames.
    #[error("connection {0} is closed")]
    TransportClosed(ConnectionId),

    /// Delivery to the peer failed for a reason other than a clean close.
    #[error("transport error on connection {connection_id}: {reason}")]
    TransportError {
        /// Connection whose transport failed.
        connection_id: ConnectionId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A connection id was registered twice.
    #[error("connection {0} is already registered")]
    DuplicateIdentity(ConnectionId),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Certificate or key material could not be loaded.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// Socket-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Returns `true` when the error cannot be recovered by dropping a
    /// single frame or a single connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Decode(_) | Self::TransportClosed(_) | Self::TransportError { .. } => false,
            Self::Encode(_)
            | Self::DuplicateIdentity(_)
            | Self::Config(_)
            | Self::Tls(_)
            | Self::Io(_) => true,
        }
    }

}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn decode_error() -> RelayError {
        let Err(err) = serde_json::from_str::<serde_json::Value>("not json") else {
            panic!("expected parse failure");
        };
        RelayError::Decode(err)
    }

    #[test]
    fn per_message_errors_are_recoverable() {
        let id = ConnectionId::new();
        assert!(!decode_error().is_fatal());
        assert!(!RelayError::TransportClosed(id).is_fatal());
        assert!(
            !RelayError::TransportError {
                connection_id: id,
                reason: "queue full".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn duplicate_identity_is_fatal() {
        assert!(RelayError::DuplicateIdentity(ConnectionId::new()).is_fatal());
        assert!(RelayError::Config("bad".to_string()).is_fatal());
    }

    #[test]
    fn display_mentions_connection() {
        let id = ConnectionId::new();
        let msg = RelayError::TransportClosed(id).to_string();
        assert!(msg.contains(&id.to_string()));
    }
}
