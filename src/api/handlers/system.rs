//! System endpoints: health check and relay statistics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests.
    pub status: String,
    /// RFC 3339 server time.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}

/// Relay counters plus current membership.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Connections currently registered.
    pub connections: usize,
    /// Messages decoded and fanned out since startup.
    pub messages_relayed: u64,
    /// Malformed frames dropped since startup.
    pub frames_rejected: u64,
    /// Frames queued on recipients since startup.
    pub deliveries: u64,
    /// Recipients evicted after a failed send since startup.
    pub evictions: u64,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /stats` — Relay statistics.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "System",
    summary = "Relay statistics",
    description = "Returns the number of open connections and relay counters since startup.",
    responses(
        (status = 200, description = "Relay statistics", body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.broadcaster.stats();
    (
        StatusCode::OK,
        Json(StatsResponse {
            connections: state.registry.len().await,
            messages_relayed: stats.messages_relayed,
            frames_rejected: stats.frames_rejected,
            deliveries: stats.deliveries,
            evictions: stats.evictions,
        }),
    )
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(path: &str, state: AppState) -> serde_json::Value {
        let app = routes().with_state(state);
        let Ok(request) = Request::builder().uri(path).body(Body::empty()) else {
            panic!("valid request");
        };
        let Ok(response) = app.oneshot(request).await else {
            panic!("router is infallible");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body readable");
        };
        let Ok(value) = serde_json::from_slice(&bytes) else {
            panic!("body is JSON");
        };
        value
    }

    #[tokio::test]
    async fn health_reports_version() {
        let body = get_json("/health", AppState::new(RelayConfig::default())).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn stats_start_at_zero() {
        let body = get_json("/stats", AppState::new(RelayConfig::default())).await;
        assert_eq!(body["connections"], 0);
        assert_eq!(body["messages_relayed"], 0);
        assert_eq!(body["evictions"], 0);
    }
}
