use crate::camera::CameraConnection;
use crate::error::{Result, StreamError};
use crate::prober::ProbeOutcome;
use crate::resolver::{redact_credentials, resolve_source_url};
use crate::session::{SessionState, StreamSession};
use crate::state::{AppState, SharedState};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Session already running; manifest is being produced
    Active,
    /// Session just launched or still warming up; poll the manifest
    Starting,
    /// Session was stopped before it became ready
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub camera_id: String,
    pub status: StreamStatus,
    /// Publish path of the manifest
    pub url: String,
}

impl StartOutcome {
    fn from_session(session: &StreamSession) -> Self {
        let status = match session.state() {
            SessionState::Active => StreamStatus::Active,
            SessionState::Probing | SessionState::Starting => StreamStatus::Starting,
            SessionState::Stopping | SessionState::Terminated => StreamStatus::Stopped,
        };
        Self {
            camera_id: session.camera_id().to_string(),
            status,
            url: session.publish_path().to_string(),
        }
    }
}

pub struct Engine;

impl Engine {
    /// Returns the running session for a camera or starts one.
    ///
    /// # Side effects
    /// - may spawn an encoder process
    /// - resets the camera's HLS output directory when a new session starts
    ///
    /// # Errors
    /// - `NotFound` when the camera directory does not know the camera
    /// - `ToolUnavailable` when the encoder is not installed
    /// - `InsufficientResources` when host memory is too low
    /// - `SpawnFailure` / `ProcessCrashed` when the new encoder fails to launch
    ///   or dies during the settle delay
    pub async fn start_stream(state: &SharedState, camera_id: &str) -> Result<StartOutcome> {
        // 1. Fast path: reuse a live session
        if let Some(session) = state.registry.get(camera_id).await {
            if session.is_live() {
                session.touch();
                return Ok(StartOutcome::from_session(&session));
            }
        }

        // 2. Look the camera up
        let connection = state
            .directory
            .get_camera(camera_id)
            .await
            .ok_or_else(|| StreamError::NotFound(camera_id.to_string()))?;

        // 3. Fail fast when the encoder cannot run at all
        state.encoder.preflight().await?;

        // 4. Check host memory
        check_memory(state.config.session.min_free_memory_kb)?;

        if let Some(previous) = state.registry.last_failure(camera_id).await {
            info!(
                camera_id = %camera_id,
                code = ?previous.code,
                failed_at = %previous.at,
                "Restarting after encoder failure"
            );
        }

        // 5. Single-flight create. Runs detached so a caller that goes away
        //    mid-start leaves a registered, reusable session behind.
        let task_state = state.clone();
        let id = camera_id.to_string();
        let (session, created) = tokio::spawn(async move {
            task_state
                .registry
                .create_if_absent(&id, || launch(&task_state, &id, connection))
                .await
        })
        .await
        .map_err(|e| StreamError::SpawnFailure(format!("start task failed: {}", e)))??;

        if !created {
            session.touch();
            return Ok(StartOutcome::from_session(&session));
        }

        // 6. Give the encoder a moment; report an immediate exit to the caller
        if let Ok(record) = timeout(state.config.session.settle_delay(), session.wait_exit()).await {
            if record.is_crash() {
                return Err(StreamError::ProcessCrashed {
                    code: record.code,
                    diagnostics: record.diagnostics,
                });
            }
            if !record.stop_requested {
                return Err(StreamError::SpawnFailure(
                    "encoder ended immediately without producing a stream".to_string(),
                ));
            }
        }

        // A concurrent stop during the settle delay shows up as `Stopped`
        Ok(StartOutcome::from_session(&session))
    }

    /// Stops the camera's session if there is one. Never fails.
    ///
    /// Holds the camera's lock until the process is confirmed gone, so a
    /// concurrent start cannot register a replacement before that.
    pub async fn stop_stream(state: &Arc<AppState>, camera_id: &str) -> Result<()> {
        let _guard = state.registry.lock_camera(camera_id).await;

        let Some(session) = state.registry.remove(camera_id).await else {
            debug!(camera_id = %camera_id, "Stop requested for idle camera");
            return Ok(());
        };

        teardown(state, &session).await;
        Ok(())
    }

    /// Stops `session` only if it is still the camera's current session.
    /// Returns whether it was stopped.
    pub async fn stop_session(state: &Arc<AppState>, session: &StreamSession) -> bool {
        let _guard = state.registry.lock_camera(session.camera_id()).await;

        if !state.registry.remove_session(session).await {
            debug!(
                camera_id = %session.camera_id(),
                session = session.id(),
                "Session already replaced or gone"
            );
            return false;
        }

        teardown(state, session).await;
        true
    }

    /// Stops every session; used at shutdown.
    pub async fn stop_all(state: &Arc<AppState>) {
        let sessions = state.registry.drain().await;
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "Stopping all sessions");

        join_all(sessions.iter().map(|s| state.encoder.stop(s))).await;
    }
}

async fn teardown(state: &AppState, session: &StreamSession) {
    let camera_id = session.camera_id();
    state.encoder.stop(session).await;
    if let Err(e) = state.publisher.clear(camera_id).await {
        warn!(camera_id = %camera_id, "Failed to clear HLS output: {}", e);
    }
    info!(camera_id = %camera_id, "Stream stopped.");
}

/// Builds, probes and launches a new session. Runs under the camera lock.
async fn launch(
    state: &AppState,
    camera_id: &str,
    connection: CameraConnection,
) -> Result<Arc<StreamSession>> {
    let source_url = resolve_source_url(&connection);
    let paths = state.publisher.paths(camera_id)?;
    let session = Arc::new(StreamSession::new(
        camera_id,
        source_url,
        state.publisher.publish_path(camera_id),
        paths.dir.clone(),
        state.config.hls.diagnostic_tail_lines,
    ));

    let redacted = redact_credentials(session.source_url());
    info!(camera_id = %camera_id, source = %redacted, "Probing source");

    // Advisory only: a failed probe is logged and the start goes ahead
    match state.prober.probe(session.source_url()).await {
        ProbeOutcome::Reachable => debug!(camera_id = %camera_id, "Source answered probe"),
        ProbeOutcome::Unreachable { reason } => warn!(
            camera_id = %camera_id,
            error = %StreamError::SourceUnreachable(reason),
            "Probe failed, starting anyway"
        ),
    }

    let paths = state.publisher.prepare(camera_id).await?;
    session.advance(SessionState::Starting);
    state
        .encoder
        .start(&session, Arc::downgrade(&state.registry), &paths)
        .await?;

    Ok(session)
}

fn check_memory(min_free_kb: u64) -> Result<()> {
    match sys_info::mem_info() {
        Ok(mem) if mem.avail < min_free_kb => {
            Err(StreamError::InsufficientResources(mem.avail))
        }
        Ok(_) => Ok(()),
        Err(e) => {
            // Not every platform exposes this; do not block on it
            warn!("Failed to check memory usage: {}", e);
            Ok(())
        }
    }
}
