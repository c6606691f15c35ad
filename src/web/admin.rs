use crate::session::{ExitRecord, SessionState};
use crate::state::SharedState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Host memory and load, in MB
pub async fn sys_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let mem = sys_info::mem_info().map(|m| (m.total, m.avail)).unwrap_or((0, 0));
    let load = sys_info::loadavg().map(|l| l.one).unwrap_or(0.0);

    Json(serde_json::json!({
        "mem_total": mem.0 / 1024,
        "mem_avail": mem.1 / 1024,
        "load_avg": load,
        "sessions": state.registry.len().await,
    }))
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub camera_id: String,
    pub state: SessionState,
    pub url: String,
    pub output_dir: String,
    pub pid: Option<u32>,
    pub restarts: u32,
    pub created_at: DateTime<Utc>,
    pub last_healthy: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub idle_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct FailureView {
    pub camera_id: String,
    #[serde(flatten)]
    pub exit: ExitRecord,
}

/// Running sessions plus the most recent unexpected exit per idle camera.
pub async fn list_streams(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let mut streams = Vec::new();
    for session in state.registry.snapshot().await {
        streams.push(SessionView {
            camera_id: session.camera_id().to_string(),
            state: session.state(),
            url: session.publish_path().to_string(),
            output_dir: session.output_dir().display().to_string(),
            pid: session.pid().await,
            restarts: session.restarts(),
            created_at: session.created_at(),
            last_healthy: session.last_healthy(),
            uptime_seconds: session.uptime().as_secs(),
            idle_seconds: session.idle_for().as_secs(),
        });
    }
    streams.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));

    let mut failures: Vec<_> = state
        .registry
        .failures()
        .await
        .into_iter()
        .map(|(camera_id, exit)| FailureView { camera_id, exit })
        .collect();
    failures.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));

    Json(serde_json::json!({
        "streams": streams,
        "failures": failures,
    }))
}
