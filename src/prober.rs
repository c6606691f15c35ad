//! Connectivity prober.
//!
//! The probe is advisory: its outcome is logged and surfaced by the ad-hoc
//! test endpoint, but it never decides whether a session gets started.
//! Some cameras refuse short test reads and still stream fine once a real
//! session connects.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

#[async_trait]
pub trait ConnectivityProber: Send + Sync {
    /// Must return within the prober's timeout regardless of the source.
    async fn probe(&self, source_url: &str) -> ProbeOutcome;
}

/// Reads one second of the source with ffmpeg into the null muxer.
#[derive(Debug, Clone)]
pub struct FfmpegProber {
    binary: String,
    timeout: Duration,
}

impl FfmpegProber {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    pub fn probe_args(source_url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        if source_url.to_ascii_lowercase().starts_with("rtsp") {
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        }
        args.extend([
            "-i".into(),
            source_url.to_string(),
            "-t".into(),
            "1".into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]);
        args
    }
}

#[async_trait]
impl ConnectivityProber for FfmpegProber {
    async fn probe(&self, source_url: &str) -> ProbeOutcome {
        let mut cmd = Command::new(&self.binary);
        cmd.args(Self::probe_args(source_url));
        run_bounded(cmd, self.timeout).await
    }
}

/// Runs `cmd` and classifies its exit, killing it once `limit` elapses.
///
/// The deadline is enforced from outside: the child is dropped with
/// `kill_on_drop` set, whatever it is blocked on.
pub async fn run_bounded(mut cmd: Command, limit: Duration) -> ProbeOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ProbeOutcome::Unreachable {
                reason: format!("probe could not run: {}", e),
            }
        }
    };

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => ProbeOutcome::Reachable,
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("probe exited with {}", output.status));
            ProbeOutcome::Unreachable { reason }
        }
        Ok(Err(e)) => ProbeOutcome::Unreachable {
            reason: e.to_string(),
        },
        Err(_) => ProbeOutcome::Unreachable {
            reason: format!("no data within {}ms", limit.as_millis()),
        },
    }
}
