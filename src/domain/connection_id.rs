//! Type-safe connection identifier.
//!
//! [`ConnectionId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that
//! connection identities cannot be confused with other UUIDs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one client connection.
///
/// Assigned once when the transport accepts the client and immutable
/// thereafter. Used as the key in [`super::Registry`] and as the
/// `connection_id` field in every log line about that client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
