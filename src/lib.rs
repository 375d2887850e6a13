//! # relay-gateway
//!
//! WebSocket JSON relay. Every message a client sends is decoded,
//! re-encoded and delivered to every connected client, the sender
//! included. Malformed messages are dropped without closing the sender;
//! recipients that cannot keep up are evicted without delaying anyone
//! else.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── TlsListener / TcpListener (transport/)
//!     ├── WS Handler + read/write loops (ws/)
//!     ├── System endpoints + static files (api/, server)
//!     │
//!     ├── Broadcaster ── codec (domain/)
//!     │
//!     └── Registry ── Connection (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod transport;
pub mod ws;
