//! Multipart call upload handler
//!
//! Accepts the form layout radio ingestion clients post: metadata fields
//! alongside an `audio` file part (or an `audioUrl` field for offsite
//! audio). Unknown fields are ignored for client compatibility.

use crate::ingest::{self, CallExtras, IngestError, IngestSource};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use radiocast_core::types::{Call, CallFrequency, CallSource};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
struct CallMetadata {
    api_key: Option<String>,
    system: Option<i32>,
    system_label: Option<String>,
    talkgroup: Option<i32>,
    talkgroup_label: Option<String>,
    talkgroup_group: Option<String>,
    talkgroup_tag: Option<String>,
    date_time: Option<DateTime<Utc>>,
    frequency: Option<i64>,
    source: Option<i32>,
    frequencies: Option<Vec<CallFrequency>>,
    sources: Option<Vec<CallSource>>,
    patches: Option<Vec<i32>>,
    audio_name: Option<String>,
    audio_type: Option<String>,
    audio_url: Option<String>,
    test: bool,
}

/// Accept both epoch timestamps (seconds or milliseconds) and RFC 3339
fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(number) = text.parse::<i64>() {
        let millis = if number.abs() >= 1_000_000_000_000 {
            number
        } else {
            number.saturating_mul(1000)
        };
        return DateTime::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": message})),
    )
        .into_response()
}

fn ingest_error_response(err: &IngestError) -> Response {
    let status = match err {
        IngestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        IngestError::Forbidden(_) => StatusCode::FORBIDDEN,
        IngestError::Invalid(_) => StatusCode::BAD_REQUEST,
        IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({"success": false, "error": err.to_string()})),
    )
        .into_response()
}

/// Handle a multipart call upload
pub async fn handle_call_upload(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Response {
    let mut metadata = CallMetadata::default();
    let mut audio: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                match name.as_str() {
                    "audio" => {
                        if metadata.audio_name.is_none() {
                            metadata.audio_name = field.file_name().map(String::from);
                        }
                        match field.bytes().await {
                            Ok(data) => audio = Some(data.to_vec()),
                            Err(err) => {
                                warn!(client = %addr.ip(), error = %err, "failed to read audio part");
                                return bad_request("failed to read audio data");
                            }
                        }
                    }
                    "key" => {
                        if let Ok(text) = field.text().await {
                            metadata.api_key = Some(text);
                        }
                    }
                    "system" => {
                        if let Ok(text) = field.text().await {
                            metadata.system = text.parse().ok();
                        }
                    }
                    "systemLabel" => {
                        if let Ok(text) = field.text().await {
                            metadata.system_label = Some(text);
                        }
                    }
                    "talkgroup" => {
                        if let Ok(text) = field.text().await {
                            metadata.talkgroup = text.parse().ok();
                        }
                    }
                    "talkgroupLabel" => {
                        if let Ok(text) = field.text().await {
                            metadata.talkgroup_label = Some(text);
                        }
                    }
                    "talkgroupGroup" => {
                        if let Ok(text) = field.text().await {
                            metadata.talkgroup_group = Some(text);
                        }
                    }
                    "talkgroupTag" => {
                        if let Ok(text) = field.text().await {
                            metadata.talkgroup_tag = Some(text);
                        }
                    }
                    "dateTime" | "datetime" => {
                        if let Ok(text) = field.text().await {
                            metadata.date_time = parse_date_time(&text);
                        }
                    }
                    "frequency" => {
                        if let Ok(text) = field.text().await {
                            metadata.frequency = text.parse().ok();
                        }
                    }
                    "source" => {
                        if let Ok(text) = field.text().await {
                            metadata.source = text.parse().ok();
                        }
                    }
                    "frequencies" | "freqList" => {
                        if let Ok(text) = field.text().await {
                            metadata.frequencies = serde_json::from_str(&text).ok();
                        }
                    }
                    "sources" | "srcList" => {
                        if let Ok(text) = field.text().await {
                            metadata.sources = serde_json::from_str(&text).ok();
                        }
                    }
                    "patches" => {
                        if let Ok(text) = field.text().await {
                            metadata.patches = serde_json::from_str(&text).ok();
                        }
                    }
                    "audioName" => {
                        if let Ok(text) = field.text().await {
                            metadata.audio_name = Some(text);
                        }
                    }
                    "audioType" => {
                        if let Ok(text) = field.text().await {
                            metadata.audio_type = Some(text);
                        }
                    }
                    "audioUrl" => {
                        if let Ok(text) = field.text().await {
                            metadata.audio_url = Some(text);
                        }
                    }
                    "test" => {
                        if let Ok(text) = field.text().await {
                            metadata.test = !text.is_empty() && text != "0";
                        }
                    }
                    _ => {
                        // Ignore unknown fields; ingestion clients send extras.
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(client = %addr.ip(), error = %err, "invalid multipart payload");
                return bad_request("invalid multipart payload");
            }
        }
    }

    // Connectivity probes don't carry a call.
    if metadata.test {
        info!(client = %addr.ip(), "ingest connectivity test");
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .body(Body::from("incomplete call data: no talkgroup"))
            .unwrap_or_else(|_| StatusCode::OK.into_response())
            .into_response();
    }

    let Some(system) = metadata.system else {
        return bad_request("system is required");
    };
    let Some(talkgroup) = metadata.talkgroup else {
        return bad_request("talkgroup is required");
    };
    if let Some(audio) = &audio {
        if audio.len() as u64 > state.config.server.max_upload_size {
            return bad_request("audio exceeds the maximum upload size");
        }
    }

    let call = Call {
        id: None,
        date_time: metadata.date_time.unwrap_or_else(Utc::now),
        system,
        talkgroup,
        frequency: metadata.frequency,
        source: metadata.source,
        sources: metadata.sources.unwrap_or_default(),
        frequencies: metadata.frequencies.unwrap_or_default(),
        patches: metadata.patches.unwrap_or_default(),
        audio,
        audio_name: metadata.audio_name,
        audio_type: metadata.audio_type,
        audio_url: metadata.audio_url,
    };
    let extras = CallExtras {
        system_label: metadata.system_label,
        talkgroup_label: metadata.talkgroup_label,
        talkgroup_group: metadata.talkgroup_group,
        talkgroup_tag: metadata.talkgroup_tag,
    };
    let source = IngestSource::ApiKey(metadata.api_key.unwrap_or_default());

    match ingest::ingest_call(&state, source, call, extras).await {
        Ok(stored) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "id": stored.id,
                "message": "call imported"
            })),
        )
            .into_response(),
        Err(err) => {
            warn!(client = %addr.ip(), error = %err, "upload rejected");
            let _ = state
                .store
                .append_log("warn", &format!("upload rejected from {}: {err}", addr.ip()))
                .await;
            ingest_error_response(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_date_time_variants() {
        let from_seconds = parse_date_time("1714551000").unwrap();
        assert_eq!(from_seconds.timestamp(), 1_714_551_000);

        let from_millis = parse_date_time("1714551000123").unwrap();
        assert_eq!(from_millis.timestamp_millis(), 1_714_551_000_123);

        let from_rfc3339 = parse_date_time("2024-05-01T08:30:00Z").unwrap();
        assert_eq!(from_rfc3339.timestamp(), 1_714_552_200);

        assert!(parse_date_time("yesterday").is_none());
    }
}
