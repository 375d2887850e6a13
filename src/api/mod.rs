//! HTTP API layer: system endpoints and the OpenAPI document.

pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// Path the OpenAPI document is served from.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// OpenAPI description of the HTTP endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "relay-gateway", description = "WebSocket JSON relay"),
    paths(handlers::system::health_handler, handlers::system::stats_handler),
    components(schemas(handlers::system::HealthResponse, handlers::system::StatsResponse)),
    tags((name = "System", description = "Health and relay statistics"))
)]
pub struct ApiDoc;

/// Builds the API router: system endpoints plus the OpenAPI document
/// (and Swagger UI with the `swagger-ui` feature).
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_PATH, ApiDoc::openapi()),
    );

    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(
        OPENAPI_PATH,
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    );

    router
}
