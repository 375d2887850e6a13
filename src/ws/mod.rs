//! WebSocket layer: upgrade handling and the per-connection read/write
//! loops.
//!
//! Every frame a client sends is relayed to all connected clients,
//! including the sender.

pub mod connection;
pub mod handler;
