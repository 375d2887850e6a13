//! Router composition and listener startup.
//!
//! The router mounts the WebSocket upgrade at the configured path, the
//! system endpoints, and falls back to static files for everything else.
//! [`serve`] runs a bound listener over plain TCP or TLS until a shutdown
//! signal arrives, then closes every connection and waits for the
//! connection tasks to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::transport::{PeerAddr, TlsListener, load_server_config};
use crate::ws::handler::ws_handler;

/// How long shutdown waits for connection tasks after draining.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builds the complete router for the given state.
pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);
    Router::new()
        .route(&state.config.ws_path, get(ws_handler))
        .merge(api::build_router())
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `router` on an already-bound plain TCP listener until `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the server fails.
pub async fn serve_tcp<F>(
    listener: TcpListener,
    router: Router,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<PeerAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Serves `router` over TLS until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the server fails.
pub async fn serve_tls<F>(
    listener: TlsListener,
    router: Router,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<PeerAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Binds the configured address and runs the relay until Ctrl-C or
/// SIGTERM.
///
/// # Errors
///
/// See [`serve`]; also returns [`RelayError::Io`] if binding fails.
pub async fn run(config: RelayConfig) -> Result<(), RelayError> {
    let tcp = TcpListener::bind(config.listen_addr).await?;
    serve(AppState::new(config), tcp, shutdown_signal()).await
}

/// Serves the relay on `tcp`, terminating TLS when the config enables it.
///
/// Once `shutdown` resolves the server stops accepting, every registered
/// connection is closed, and the call returns after the connection tasks
/// have written their Close frames (bounded by a grace period).
///
/// # Errors
///
/// Returns [`RelayError::Tls`] if certificate material cannot be loaded,
/// or [`RelayError::Io`] if serving fails.
pub async fn serve<F>(
    state: AppState,
    tcp: TcpListener,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::clone(&state.registry);
    let tasks = state.tasks.clone();
    let config = Arc::clone(&state.config);
    let router = build_router(state);

    let drain = async move {
        shutdown.await;
        let closed = registry.drain().await;
        tracing::info!(closed, "shutting down");
    };

    let local_addr = tcp.local_addr()?;
    let served = if config.tls.enabled {
        let server_config = load_server_config(&config.tls)?;
        let listener = TlsListener::new(tcp, server_config, config.tls.handshake_timeout)?;
        tracing::info!(addr = %local_addr, ws_path = %config.ws_path, "listening (tls)");
        serve_tls(listener, router, drain).await
    } else {
        tracing::info!(addr = %local_addr, ws_path = %config.ws_path, "listening");
        serve_tcp(tcp, router, drain).await
    };

    // Upgraded sockets are not tracked by axum's graceful shutdown.
    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
        tracing::warn!(remaining = tasks.len(), "connection tasks still running at shutdown");
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
