//! Inference API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.
//!
//! Layer stack (outermost → innermost):
//! CORS → Cache-Control default → Audit logger → Body limit → Handler

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Uri};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::error::ApiError;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::config::BridgeConfig;

/// Build the API router for `config`.
pub fn bridge_router(config: BridgeConfig) -> Router {
    build_router(ApiContext::new(config))
}

/// Build router from a pre-constructed `ApiContext`.
pub fn build_router(ctx: ApiContext) -> Router {
    let body_limit = ctx.config.max_upload_bytes;

    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/classify", post(endpoints::classify::classify))
        .route(
            "/report-inference",
            post(endpoints::reports::report_inference),
        )
        .route(
            "/compare-inference",
            post(endpoints::reports::compare_inference),
        )
        .route("/ai-doctor", post(endpoints::consult::ai_doctor))
        .route("/radiology", post(endpoints::consult::radiology))
        .route(
            "/general-health-support",
            post(endpoints::consult::health_support),
        )
        .route("/exercise", post(endpoints::exercise::analyze))
        .route("/exercise/video", post(endpoints::exercise::video))
        .route("/exercise/stream", get(endpoints::exercise::live))
        .with_state(ctx)
        // Layers (innermost first, outermost last):
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        // SSE responses set their own no-cache policy.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors_layer());

    Router::new().nest("/api", api).fallback(not_found)
}

/// The web client is served from another origin.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
