//! Router configuration for the API server.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    // Leave headroom over the raw image size for multipart framing.
    let body_limit = state.max_upload_bytes as usize + 64 * 1024;

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/v1/scans",
            post(handlers::create_scan).get(handlers::list_scans),
        )
        .route("/v1/scans/:scan_id", get(handlers::get_scan))
        .route("/v1/scans/:scan_id/image", get(handlers::get_scan_image))
        .route("/v1/scans/:scan_id/annotate", post(handlers::annotate_scan))
        .route(
            "/v1/scans/:scan_id/annotations",
            get(handlers::list_annotations),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
