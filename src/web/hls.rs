use crate::error::StreamError;
use crate::publisher::MANIFEST_NAME;
use crate::state::SharedState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const MANIFEST_WAIT_ATTEMPTS: u32 = 10;
const MANIFEST_WAIT_STEP: Duration = Duration::from_millis(200);

/// Serves the published manifest and segments of a running session.
///
/// Fetching never starts a stream; clients call the start API first and
/// then poll here. Every request counts as viewer activity.
pub async fn serve_hls_file(
    State(state): State<SharedState>,
    Path((camera_id, file_name)): Path<(String, String)>,
) -> Response {
    // 1. Reject anything that could leave the camera directory
    let Some(file_path) = state.publisher.file_path(&camera_id, &file_name) else {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    };

    // 2. Only live sessions publish anything
    let Some(session) = state.registry.get(&camera_id).await.filter(|s| s.is_live()) else {
        return (StatusCode::NOT_FOUND, "Stream not running").into_response();
    };
    session.touch();

    // 3. Manifest: give a fresh encoder a moment, then serve the filtered view
    if file_name == MANIFEST_NAME {
        for i in 0..MANIFEST_WAIT_ATTEMPTS {
            if state.publisher.manifest_exists(&camera_id).await {
                break;
            }
            if i == 0 {
                debug!(camera_id = %camera_id, "Waiting for HLS generation");
            }
            tokio::time::sleep(MANIFEST_WAIT_STEP).await;
        }

        return match state.publisher.read_manifest(&camera_id).await {
            Ok(body) => (
                [
                    (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                ],
                body,
            )
                .into_response(),
            Err(StreamError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, "Manifest not ready").into_response()
            }
            Err(e) => {
                warn!(camera_id = %camera_id, "Failed to read manifest: {}", e);
                e.into_response()
            }
        };
    }

    // 4. Segment: stream the file as-is
    let file = match File::open(&file_path).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "File not found").into_response(),
    };

    let content_type = mime_guess::from_path(&file_path)
        .first_or_octet_stream()
        .to_string();
    let body = Body::from_stream(ReaderStream::new(file));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
        ],
        body,
    )
        .into_response()
}
