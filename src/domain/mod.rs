//! Domain layer: connection lifecycle, registry, codec and fan-out.
//!
//! This module holds everything with a concurrency or state-management
//! concern. The transport (`ws`, `transport`) only accepts sockets and
//! pumps frames in and out of these types.

pub mod broadcaster;
pub mod codec;
pub mod connection;
pub mod connection_id;
pub mod registry;

pub use broadcaster::{BroadcastReport, Broadcaster, StatsSnapshot};
pub use codec::RelayMessage;
pub use connection::{Connection, ConnectionState, Outbound};
pub use connection_id::ConnectionId;
pub use registry::{Registry, Snapshot};
