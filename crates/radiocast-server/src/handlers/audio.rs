//! Call audio download handler

use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Redirect, Response};
use radiocast_core::Error;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "error": "call not found"})),
    )
        .into_response()
}

/// Stream a call's audio, or redirect to its offsite location
pub async fn get_call_audio(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    let call = match state.store.get_call(id).await {
        Ok(call) => call,
        Err(Error::NotFound { .. }) => return not_found(),
        Err(err) => {
            error!(call = id, error = %err, "audio fetch failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "store error"})),
            )
                .into_response();
        }
    };

    if let Some(audio) = call.audio.filter(|audio| !audio.is_empty()) {
        let content_type = call
            .audio_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let filename = call
            .audio_name
            .unwrap_or_else(|| format!("call-{id}"))
            .replace(['"', '\\'], "_");

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            )
            .body(Body::from(audio))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    // URL-backed call: resolution is the client's concern.
    match call.audio_url.filter(|url| !url.is_empty()) {
        Some(url) => Redirect::temporary(&url).into_response(),
        None => not_found(),
    }
}
