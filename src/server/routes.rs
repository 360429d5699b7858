//! Request handlers for the stream CRUD surface.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::AppContext;
use crate::error::Error;
use crate::model::{AdvertisementInsert, VideoQuality, Watermark};

/// Accepted source URL schemes.
const STREAM_URL_SCHEMES: [&str; 4] = ["rtmp://", "rtsp://", "http://", "https://"];

/// Wire format for scheduled start times.
const START_TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub stream_url: String,

    #[serde(default)]
    pub storage_types: Vec<String>,

    #[serde(default)]
    pub video_quality: VideoQuality,

    #[serde(default)]
    pub watermark: Option<Watermark>,

    /// `dd.MM.yyyy HH:mm`, interpreted as UTC. Absent means start now.
    #[serde(default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdvertisementRequest {
    pub session_id: String,

    /// Sequence number the break starts at.
    pub start_segment: u64,

    /// Already-segmented ad creative on local disk.
    pub source_path: String,

    pub duration_secs: u64,

    /// Segment file names of the break, in playback order.
    pub segment_names: Vec<String>,
}

pub async fn start_stream(
    State(ctx): State<AppContext>,
    Json(request): Json<StartStreamRequest>,
) -> Response {
    if !STREAM_URL_SCHEMES
        .iter()
        .any(|scheme| request.stream_url.starts_with(scheme))
    {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid stream URL format".to_string(),
        )
            .into_response();
    }

    let scheduled_start = match parse_start_time(request.start_time.as_deref()) {
        Ok(scheduled_start) => scheduled_start,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let result = ctx
        .orchestrator
        .start(
            &request.stream_url,
            &request.storage_types,
            request.video_quality,
            request.watermark,
            scheduled_start,
            None,
        )
        .await;

    match result {
        Ok(session) => Json(session.playback_urls(&ctx.config.server.public_url)).into_response(),
        Err(Error::InvalidInput(message)) => (StatusCode::BAD_REQUEST, message).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to start stream: {e}"),
        )
            .into_response(),
    }
}

pub async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Response {
    ctx.orchestrator.stop(&session_id).await;
    (StatusCode::OK, "Stream stopped successfully").into_response()
}

pub async fn get_playlist(
    State(ctx): State<AppContext>,
    Path((session_id, backend)): Path<(String, String)>,
) -> Response {
    let content = ctx.playlist.playlist_content(&session_id, &backend).await;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .body(Body::from(content))
        .unwrap()
}

pub async fn insert_advertisement(
    State(ctx): State<AppContext>,
    Json(request): Json<AdvertisementRequest>,
) -> Response {
    let ad = AdvertisementInsert::new(
        request.source_path,
        request.duration_secs,
        &request.segment_names,
    );

    let result = ctx
        .playlist
        .insert_advertisement(&request.session_id, request.start_segment, ad)
        .await;

    match result {
        Ok(()) => (StatusCode::OK, "Advertisement inserted").into_response(),
        Err(Error::NotFound(id)) => {
            (StatusCode::NOT_FOUND, format!("Session not found: {id}")).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to insert advertisement: {e}"),
        )
            .into_response(),
    }
}

fn parse_start_time(start_time: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match start_time {
        None => Ok(None),
        Some(raw) => NaiveDateTime::parse_from_str(raw, START_TIME_FORMAT)
            .map(|naive| Some(naive.and_utc()))
            .map_err(|_| format!("Invalid start time, expected dd.MM.yyyy HH:mm: {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_time() {
        let parsed = parse_start_time(Some("31.12.2026 18:30")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-12-31T18:30:00+00:00");

        assert_eq!(parse_start_time(None).unwrap(), None);
        assert!(parse_start_time(Some("2026-12-31 18:30")).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: StartStreamRequest = serde_json::from_str(
            r#"{"stream_url": "rtmp://example.com/live", "storage_types": ["local"]}"#,
        )
        .unwrap();
        assert_eq!(request.video_quality, VideoQuality::Low);
        assert!(request.watermark.is_none());
        assert!(request.start_time.is_none());
    }
}
