//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::config::RelayConfig;
use crate::domain::{Broadcaster, Registry};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Process-wide set of open connections.
    pub registry: Arc<Registry>,
    /// Fan-out over `registry`.
    pub broadcaster: Arc<Broadcaster>,
    /// Loaded configuration.
    pub config: Arc<RelayConfig>,
    /// Per-connection reader and writer tasks, awaited at shutdown.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Builds a fresh registry and a broadcaster over it.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        Self {
            registry,
            broadcaster,
            config: Arc::new(config),
            tasks: TaskTracker::new(),
        }
    }
}
