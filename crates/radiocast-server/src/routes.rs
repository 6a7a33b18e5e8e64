//! Route definitions

use crate::handlers;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

/// HTTP API routes (everything but the live-feed socket)
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root_endpoint))
        .route("/api/call-upload", post(handlers::upload::handle_call_upload))
        .route("/api/call-audio/:id", get(handlers::audio::get_call_audio))
        .route("/health", get(health_check))
        .layer(CompressionLayer::new())
}

/// Combine all routes into the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.server.max_upload_size)
        .unwrap_or(usize::MAX)
        // Multipart framing overhead on top of the audio itself.
        .saturating_add(1_048_576);

    Router::new()
        .route("/ws", get(handlers::ws::websocket))
        .merge(api_routes())
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn root_endpoint(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": state.config.server.branding,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "healthy"}))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "error": err.to_string()})),
        ),
    }
}

async fn not_found_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": "the requested endpoint does not exist"
        })),
    )
}
