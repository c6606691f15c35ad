use crate::engine::{Engine, StartOutcome};
use crate::error::Result;
use crate::prober::ProbeOutcome;
use crate::resolver::{normalize_source_url, redact_credentials};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Starts the camera's stream, or reports the one already running.
/// Returns the manifest URL to poll.
pub async fn start_stream(
    State(state): State<SharedState>,
    Path(camera_id): Path<String>,
) -> Result<Json<StartOutcome>> {
    let outcome = Engine::start_stream(&state, &camera_id).await?;
    Ok(Json(outcome))
}

/// Stops the camera's stream. Succeeds when nothing was running.
pub async fn stop_stream(
    State(state): State<SharedState>,
    Path(camera_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    Engine::stop_stream(&state, &camera_id).await?;
    Ok(Json(json!({
        "message": format!("Stream [{}] stopped", camera_id)
    })))
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    /// Normalized URL, credentials masked
    pub url: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Probes an arbitrary source URL without starting a session.
pub async fn test_stream(
    State(state): State<SharedState>,
    Json(req): Json<TestRequest>,
) -> Json<TestResponse> {
    let url = normalize_source_url(&req.url);
    let redacted = redact_credentials(&url);
    info!(source = %redacted, "Ad-hoc probe");

    let outcome = state.prober.probe(&url).await;
    let reachable = outcome.is_reachable();
    let detail = match outcome {
        ProbeOutcome::Reachable => None,
        ProbeOutcome::Unreachable { reason } => Some(reason),
    };

    Json(TestResponse {
        url: redacted,
        reachable,
        detail,
    })
}
