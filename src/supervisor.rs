use crate::engine::Engine;
use crate::session::SessionState;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What a single sweep did, mostly for tests and debug logs
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub promoted: usize,
    pub stale: usize,
    pub stopped: usize,
    pub pruned: usize,
}

/// Background task that periodically checks every session.
///
/// # Per tick
/// - promotes `Starting` sessions to `Active` once the encoder writes a manifest
/// - refreshes the healthy timestamp while the manifest keeps changing
/// - warns about active sessions whose manifest went stale
/// - stops sessions nobody has fetched within the idle timeout
/// - prunes segment files that fell out of the playlist window
///
/// Process exits are not polled here; each encoder's watcher task reports
/// them to the registry as they happen.
pub async fn start_supervisor(state: Arc<AppState>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        interval.tick().await;
        let report = sweep(&state).await;
        if report != SweepReport::default() {
            tracing::debug!(?report, "Supervisor sweep");
        }
    }
}

pub async fn sweep(state: &Arc<AppState>) -> SweepReport {
    let mut report = SweepReport::default();
    let stale_after = Duration::from_secs(state.config.session.stale_after_secs);
    let idle_timeout = state.config.session.idle_timeout_secs;
    let mut to_stop = Vec::new();

    // --- Phase 1: health and idleness ---
    for session in state.registry.snapshot().await {
        if !session.is_live() {
            continue;
        }
        let camera_id = session.camera_id();

        match state.publisher.manifest_age(camera_id).await {
            Some(age) if age <= stale_after => {
                session.mark_healthy();
                if session.state() == SessionState::Starting && session.advance(SessionState::Active) {
                    info!(camera_id = %camera_id, "Stream is live");
                    report.promoted += 1;
                }
            }
            Some(age) if session.state() == SessionState::Active => {
                warn!(
                    camera_id = %camera_id,
                    age_secs = age.as_secs(),
                    "Manifest is stale; encoder may be stuck"
                );
                report.stale += 1;
            }
            _ => {}
        }

        if idle_timeout > 0 {
            let idle = session.idle_for();
            if idle.as_secs() > idle_timeout {
                info!(
                    camera_id = %camera_id,
                    idle_secs = idle.as_secs(),
                    "Session idle. Scheduling stop."
                );
                to_stop.push(session.clone());
                continue;
            }
        }

        // --- Phase 2: segment window ---
        match state.publisher.prune(camera_id).await {
            Ok(n) => report.pruned += n,
            Err(e) => warn!(camera_id = %camera_id, "Segment pruning failed: {}", e),
        }
    }

    // --- Phase 3: stop idle sessions ---
    // Only the sessions judged idle above; a replacement started meanwhile stays up
    for session in to_stop {
        if Engine::stop_session(state, &session).await {
            report.stopped += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_state, ShellEncoder, StubProber};
    use crate::camera::{CameraConnection, StaticCameraDirectory};
    use tempfile::TempDir;

    // Writes a playlist with segments 0..6 and then idles
    const WRITER: &str = r##"
i=0
m="#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:0"
while [ $i -lt 6 ]; do
  f=$(printf 'segment_%05d.ts' $i)
  echo data > "$OUT/$f"
  m="$m
#EXTINF:2.000000,
$f"
  i=$((i+1))
done
printf '%s\n' "$m" > "$OUT/index.m3u8"
exec sleep 30
"##;

    #[cfg(unix)]
    #[tokio::test]
    async fn sweep_promotes_and_prunes() {
        let tmp = TempDir::new().unwrap();
        let encoder = Arc::new(ShellEncoder::new(WRITER));
        let state = test_state(tmp.path(), encoder, Arc::new(StubProber::reachable()));

        Engine::start_stream(&state, "cam1").await.unwrap();
        let session = state.registry.get("cam1").await.unwrap();
        assert_eq!(session.state(), SessionState::Starting);

        for _ in 0..50 {
            if state.publisher.manifest_exists("cam1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let report = sweep(&state).await;
        assert_eq!(report.promoted, 1);
        // window is 3 in the test config
        assert_eq!(report.pruned, 3);
        assert_eq!(session.state(), SessionState::Active);
        assert!(!tmp.path().join("cam1/segment_00002.ts").exists());
        assert!(tmp.path().join("cam1/segment_00003.ts").exists());

        let manifest = state.publisher.read_manifest("cam1").await.unwrap();
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:3"));
        assert_eq!(manifest.matches("#EXTINF").count(), 3);

        Engine::stop_all(&state).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn idle_sessions_are_stopped() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        config.session.idle_timeout_secs = 1;
        let directory = StaticCameraDirectory::new([(
            "cam1".to_string(),
            CameraConnection {
                address: "cam1.local".into(),
                ..Default::default()
            },
        )]);
        let state = Arc::new(AppState::with_components(
            config,
            Arc::new(directory),
            Arc::new(StubProber::reachable()),
            Arc::new(ShellEncoder::new("exec sleep 30")),
        ));

        Engine::start_stream(&state, "cam1").await.unwrap();
        let session = state.registry.get("cam1").await.unwrap();

        assert_eq!(sweep(&state).await.stopped, 0);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let report = sweep(&state).await;

        assert_eq!(report.stopped, 1);
        assert!(session.is_terminated());
        assert!(state.registry.get("cam1").await.is_none());
    }
}
