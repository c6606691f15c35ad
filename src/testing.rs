//! Stand-ins for the external pieces (ffmpeg, cameras) used across tests.

use crate::camera::{CameraConnection, CameraKind, StaticCameraDirectory};
use crate::config::AppConfig;
use crate::encoder::EncoderCommand;
use crate::prober::{ConnectivityProber, ProbeOutcome};
use crate::publisher::SessionPaths;
use crate::state::{AppState, SharedState};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

/// Runs a shell snippet in place of the encoder and counts spawns.
///
/// The snippet sees `$OUT` (output directory) and `$SRC` (source URL).
pub struct ShellEncoder {
    script: Mutex<String>,
    spawned: AtomicUsize,
    available: bool,
}

impl ShellEncoder {
    pub fn new(script: &str) -> Self {
        Self {
            script: Mutex::new(script.to_string()),
            spawned: AtomicUsize::new(0),
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new("exit 0")
        }
    }

    pub fn set_script(&self, script: &str) {
        *self.script.lock().unwrap() = script.to_string();
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl EncoderCommand for ShellEncoder {
    fn name(&self) -> &str {
        "sh"
    }

    fn version_command(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", if self.available { "exit 0" } else { "exit 127" }]);
        cmd
    }

    fn session_command(&self, source_url: &str, paths: &SessionPaths) -> Command {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(self.script.lock().unwrap().clone())
            .env("OUT", &paths.dir)
            .env("SRC", source_url);
        cmd
    }
}

/// Prober with a fixed answer
pub struct StubProber {
    outcome: ProbeOutcome,
    pub calls: AtomicUsize,
}

impl StubProber {
    pub fn reachable() -> Self {
        Self {
            outcome: ProbeOutcome::Reachable,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            outcome: ProbeOutcome::Unreachable {
                reason: "connection timed out".into(),
            },
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectivityProber for StubProber {
    async fn probe(&self, _source_url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

pub fn test_config(hls_root: &Path) -> AppConfig {
    let yaml = format!(
        r#"
server:
  listen: "127.0.0.1:0"
  hls_root: "{}"
  supervisor_interval_ms: 100
session:
  probe_timeout_ms: 200
  settle_delay_ms: 150
  stop_grace_ms: 500
hls:
  window: 3
"#,
        hls_root.display()
    );
    AppConfig::from_yaml(&yaml).unwrap()
}

/// State with two cameras (`cam1`, `cam2`) backed by the given fakes.
pub fn test_state(
    hls_root: &Path,
    encoder: Arc<ShellEncoder>,
    prober: Arc<StubProber>,
) -> SharedState {
    let cameras = ["cam1", "cam2"].map(|id| {
        (
            id.to_string(),
            CameraConnection {
                address: format!("{}.local", id),
                kind: CameraKind::Hikvision,
                ..Default::default()
            },
        )
    });

    Arc::new(AppState::with_components(
        test_config(hls_root),
        Arc::new(StaticCameraDirectory::new(cameras)),
        prober,
        encoder,
    ))
}
