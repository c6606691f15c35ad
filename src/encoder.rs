//! Encoder supervisor: owns the lifecycle of one external encoding process
//! per session.
//!
//! Every spawned process gets its own watcher task that owns the `Child`,
//! plus one drain task per output stream. The watcher waits for either the
//! process to exit or a stop request, escalates SIGTERM to a kill after the
//! grace period, then reports the exit to the session and the registry.
//! An active session whose process exits on its own is respawned with a
//! capped backoff instead; the source most likely dropped for a moment.

use crate::config::HlsConfig;
use crate::error::{Result, StreamError};
use crate::publisher::SessionPaths;
use crate::registry::SessionRegistry;
use crate::resolver::redact_credentials;
use crate::session::{DiagnosticTail, ExitRecord, SessionState, StreamSession};
use chrono::Utc;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How long output drains may lag behind the process exit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound for the `-version` availability check
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);
/// First respawn delay; doubles per attempt up to the configured maximum
const RECONNECT_BASE: Duration = Duration::from_millis(500);
/// Floor for the respawn delay so a broken source cannot spin the loop
const RECONNECT_FLOOR: Duration = Duration::from_millis(100);
/// A process that ran this long resets the backoff
const RECONNECT_RESET: Duration = Duration::from_secs(30);

/// Builds the commands the supervisor runs.
pub trait EncoderCommand: Send + Sync {
    /// Short name for logs and errors
    fn name(&self) -> &str;
    /// Cheap command that succeeds iff the tool is installed
    fn version_command(&self) -> Command;
    /// Long-running command that turns `source_url` into HLS under `paths`
    fn session_command(&self, source_url: &str, paths: &SessionPaths) -> Command;
}

/// ffmpeg writing a sliding-window HLS playlist
#[derive(Debug, Clone)]
pub struct FfmpegHls {
    binary: String,
    hls: HlsConfig,
}

impl FfmpegHls {
    pub fn new(binary: &str, hls: HlsConfig) -> Self {
        Self {
            binary: binary.to_string(),
            hls,
        }
    }

    pub fn session_args(&self, source_url: &str, paths: &SessionPaths) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-nostats", "-loglevel", "warning", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let lower = source_url.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            // TCP interleaving survives NAT and lossy links better than UDP
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
            args.extend([
                "-timeout".into(),
                (u64::from(self.hls.io_timeout_secs) * 1_000_000).to_string(),
            ]);
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            args.extend([
                "-reconnect".into(),
                "1".into(),
                "-reconnect_streamed".into(),
                "1".into(),
                "-reconnect_on_network_error".into(),
                "1".into(),
                "-reconnect_delay_max".into(),
                self.hls.reconnect_delay_max_secs.to_string(),
            ]);
        }

        args.extend(["-i".into(), source_url.to_string()]);
        args.extend(self.hls.encode_args.iter().cloned());

        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.hls.segment_secs.to_string(),
            "-hls_list_size".into(),
            self.hls.window.to_string(),
            "-hls_delete_threshold".into(),
            "1".into(),
            "-hls_flags".into(),
            "delete_segments+independent_segments+omit_endlist".into(),
            "-hls_segment_type".into(),
            "mpegts".into(),
            "-hls_segment_filename".into(),
            paths.segment_pattern.to_string_lossy().into_owned(),
            paths.manifest.to_string_lossy().into_owned(),
        ]);
        args
    }
}

impl EncoderCommand for FfmpegHls {
    fn name(&self) -> &str {
        &self.binary
    }

    fn version_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-version");
        cmd
    }

    fn session_command(&self, source_url: &str, paths: &SessionPaths) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.session_args(source_url, paths));
        cmd
    }
}

pub struct EncoderSupervisor {
    command: Arc<dyn EncoderCommand>,
    /// Cached outcome of the availability check
    availability: OnceCell<std::result::Result<(), String>>,
    stop_grace: Duration,
    reconnect_max: Duration,
}

impl EncoderSupervisor {
    pub fn new(command: Arc<dyn EncoderCommand>, stop_grace: Duration) -> Self {
        Self {
            command,
            availability: OnceCell::new(),
            stop_grace,
            reconnect_max: Duration::from_secs(5),
        }
    }

    /// Upper bound for the wait before respawning an active session's
    /// encoder after it lost its source.
    pub fn with_reconnect_delay(mut self, max: Duration) -> Self {
        self.reconnect_max = max;
        self
    }

    /// Verifies once that the encoder can be executed on this host. Every
    /// later call returns the cached verdict.
    pub async fn preflight(&self) -> Result<()> {
        let verdict = self
            .availability
            .get_or_init(|| async {
                let mut cmd = self.command.version_command();
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true);

                let outcome = match cmd.spawn() {
                    Ok(mut child) => match timeout(PREFLIGHT_TIMEOUT, child.wait()).await {
                        Ok(Ok(status)) if status.success() => Ok(()),
                        Ok(Ok(status)) => Err(format!("{} -version exited with {}", self.command.name(), status)),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("{} -version did not answer", self.command.name())),
                    },
                    Err(e) => Err(format!("{}: {}", self.command.name(), e)),
                };

                match &outcome {
                    Ok(()) => info!(encoder = %self.command.name(), "Encoder available"),
                    Err(reason) => error!(reason = %reason, "Encoder unavailable; stream starts will fail"),
                }
                outcome
            })
            .await;

        verdict.clone().map_err(StreamError::ToolUnavailable)
    }

    /// Launches the encoder for `session`, writing into `paths`.
    ///
    /// # Side effects
    /// - creates the output directory if missing
    /// - spawns the process plus its drain and watcher tasks
    ///
    /// # Errors
    /// - `ToolUnavailable` when the preflight check failed
    /// - `SpawnFailure` when the process could not be launched
    ///
    /// On error the session is marked terminated.
    pub async fn start(
        &self,
        session: &Arc<StreamSession>,
        registry: Weak<SessionRegistry>,
        paths: &SessionPaths,
    ) -> Result<()> {
        if let Err(e) = self.launch(session, registry, paths).await {
            session.advance(SessionState::Terminated);
            return Err(e);
        }
        Ok(())
    }

    async fn launch(
        &self,
        session: &Arc<StreamSession>,
        registry: Weak<SessionRegistry>,
        paths: &SessionPaths,
    ) -> Result<()> {
        self.preflight().await?;
        tokio::fs::create_dir_all(&paths.dir).await?;

        let camera_id = session.camera_id().to_string();
        let tail = session.diagnostics();
        let (child, drains) = spawn_encoder(
            self.command.as_ref(),
            session.source_url(),
            paths,
            &camera_id,
            &tail,
        )
        .map_err(|e| {
            error!(camera_id = %camera_id, "Failed to spawn encoder: {}", e);
            if e.kind() == std::io::ErrorKind::NotFound {
                StreamError::ToolUnavailable(format!("{}: {}", self.command.name(), e))
            } else {
                StreamError::SpawnFailure(e.to_string())
            }
        })?;

        let pid = child.id();

        let (stop_tx, stop_rx) = oneshot::channel();
        session.attach_process(pid, stop_tx).await;

        info!(
            camera_id = %camera_id,
            pid = ?pid,
            source = %redact_credentials(session.source_url()),
            output = ?paths.dir,
            "Encoder started"
        );

        tokio::spawn(watch_process(WatchContext {
            child,
            stop_rx,
            drains,
            tail,
            session: Arc::downgrade(session),
            registry,
            command: self.command.clone(),
            source_url: session.source_url().to_string(),
            paths: paths.clone(),
            camera_id,
            grace: self.stop_grace,
            reconnect_max: self.reconnect_max,
        }));

        Ok(())
    }

    /// Stops the session's process: SIGTERM, then a kill once the grace
    /// period runs out. Returns after the exit is confirmed. Safe on
    /// sessions that already ended or never got a process.
    pub async fn stop(&self, session: &StreamSession) {
        if session.is_terminated() {
            return;
        }
        session.advance(SessionState::Stopping);

        if !session.has_process().await {
            session.advance(SessionState::Terminated);
            return;
        }

        session.request_stop().await;

        // The watcher force-kills after the grace period; give it room to do so
        let budget = self.stop_grace + DRAIN_TIMEOUT + Duration::from_secs(1);
        match timeout(budget, session.wait_exit()).await {
            Ok(record) => debug!(
                camera_id = %session.camera_id(),
                code = ?record.code,
                "Encoder stopped"
            ),
            Err(_) => {
                warn!(camera_id = %session.camera_id(), "Encoder did not confirm exit in time");
                session.advance(SessionState::Terminated);
            }
        }
    }
}

/// Spawns the session command with piped output and starts draining it.
fn spawn_encoder(
    command: &dyn EncoderCommand,
    source_url: &str,
    paths: &SessionPaths,
    camera_id: &str,
    tail: &Arc<DiagnosticTail>,
) -> std::io::Result<(Child, Vec<JoinHandle<()>>)> {
    let mut cmd = command.session_command(source_url, paths);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let mut drains = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        drains.push(drain_output(stdout, "stdout", camera_id.to_string(), tail.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.push(drain_output(stderr, "stderr", camera_id.to_string(), tail.clone()));
    }
    Ok((child, drains))
}

struct WatchContext {
    child: Child,
    stop_rx: oneshot::Receiver<()>,
    drains: Vec<JoinHandle<()>>,
    tail: Arc<DiagnosticTail>,
    session: Weak<StreamSession>,
    registry: Weak<SessionRegistry>,
    command: Arc<dyn EncoderCommand>,
    source_url: String,
    paths: SessionPaths,
    camera_id: String,
    grace: Duration,
    reconnect_max: Duration,
}

async fn watch_process(ctx: WatchContext) {
    let WatchContext {
        mut child,
        mut stop_rx,
        mut drains,
        tail,
        session,
        registry,
        command,
        source_url,
        paths,
        camera_id,
        grace,
        reconnect_max,
    } = ctx;

    let mut attempt: u32 = 0;
    let mut spawned_at = Instant::now();

    // A dropped sender (session gone) counts as a stop request
    let (status, stop_requested) = loop {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut stop_rx => None,
        };
        let status = match exited {
            Some(status) => status,
            None => break (terminate(&mut child, grace, &camera_id).await, true),
        };
        join_drains(std::mem::take(&mut drains)).await;

        // Only sessions that already published get another process
        let current = session.upgrade().map(|s| s.state());
        match current {
            Some(SessionState::Active) => {}
            Some(SessionState::Stopping) => break (status, true),
            _ => break (status, false),
        }

        if spawned_at.elapsed() >= RECONNECT_RESET {
            attempt = 0;
        }
        let delay = reconnect_delay(attempt, reconnect_max);
        attempt = attempt.saturating_add(1);
        warn!(
            camera_id = %camera_id,
            code = ?status.as_ref().ok().and_then(|s| s.code()),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Encoder lost its source, reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut stop_rx => break (status, true),
        }

        match spawn_encoder(command.as_ref(), &source_url, &paths, &camera_id, &tail) {
            Ok((next, next_drains)) => {
                child = next;
                drains = next_drains;
                spawned_at = Instant::now();
                if let Some(session) = session.upgrade() {
                    session.replace_pid(child.id()).await;
                }
                info!(camera_id = %camera_id, pid = ?child.id(), "Encoder respawned");
            }
            Err(e) => {
                error!(camera_id = %camera_id, "Failed to respawn encoder: {}", e);
                break (status, false);
            }
        }
    };

    join_drains(drains).await;

    let code = match &status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(camera_id = %camera_id, "Failed to wait on encoder: {}", e);
            None
        }
    };

    let record = ExitRecord {
        code,
        diagnostics: tail.snapshot().await,
        stop_requested,
        at: Utc::now(),
    };

    if record.is_crash() {
        warn!(
            camera_id = %camera_id,
            code = ?record.code,
            diagnostics = %record.diagnostics,
            "Encoder exited unexpectedly"
        );
    } else {
        info!(camera_id = %camera_id, code = ?record.code, "Encoder exited");
    }

    let Some(session) = session.upgrade() else {
        return;
    };
    session.record_exit(record.clone());
    if let Some(registry) = registry.upgrade() {
        registry.reconcile_exit(&session, &record).await;
    }
}

async fn join_drains(drains: Vec<JoinHandle<()>>) {
    for drain in drains {
        let abort = drain.abort_handle();
        if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            abort.abort();
        }
    }
}

fn reconnect_delay(attempt: u32, max: Duration) -> Duration {
    let backoff = RECONNECT_BASE.saturating_mul(1u32 << attempt.min(16));
    backoff.min(max).max(RECONNECT_FLOOR)
}

async fn terminate(
    child: &mut Child,
    grace: Duration,
    camera_id: &str,
) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(camera_id = %camera_id, "Encoder ignored SIGTERM, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

/// Reads a process output stream to EOF so the pipe never fills up,
/// keeping the last lines for crash reports.
fn drain_output<R>(
    reader: R,
    stream: &'static str,
    camera_id: String,
    tail: Arc<DiagnosticTail>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    debug!(camera_id = %camera_id, stream, "{}", line);
                    tail.push(line.to_string()).await;
                }
                Err(e) => {
                    debug!(camera_id = %camera_id, stream, "Output read failed: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ShellEncoder;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn paths(root: &std::path::Path) -> SessionPaths {
        let dir = root.join("cam");
        SessionPaths {
            manifest: dir.join("index.m3u8"),
            segment_pattern: dir.join("segment_%05d.ts"),
            dir,
        }
    }

    fn new_session(dir: PathBuf) -> Arc<StreamSession> {
        Arc::new(StreamSession::new(
            "cam",
            "rtsp://cam:554/stream".into(),
            "/hls/cam/index.m3u8".into(),
            dir,
            20,
        ))
    }

    #[test]
    fn ffmpeg_args_for_rtsp_source() {
        let ffmpeg = FfmpegHls::new("ffmpeg", HlsConfig::default());
        let p = paths(std::path::Path::new("/srv/hls"));
        let args = ffmpeg.session_args("rtsp://cam:554/stream", &p);
        let joined = args.join(" ");

        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-timeout 10000000"));
        assert!(!joined.contains("-reconnect"));
        assert!(joined.contains("-i rtsp://cam:554/stream"));
        assert!(joined.contains("-hls_time 2"));
        assert!(joined.contains("-hls_list_size 5"));
        assert!(joined.contains("delete_segments"));
        assert!(joined.contains("/srv/hls/cam/segment_%05d.ts"));
        assert_eq!(args.last().unwrap(), "/srv/hls/cam/index.m3u8");
        // input options precede the input
        let input = args.iter().position(|a| a == "-i").unwrap();
        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert!(transport < input);
    }

    #[test]
    fn ffmpeg_args_for_http_source() {
        let ffmpeg = FfmpegHls::new("ffmpeg", HlsConfig::default());
        let p = paths(std::path::Path::new("/srv/hls"));
        let joined = ffmpeg.session_args("https://cdn/live.m3u8", &p).join(" ");

        assert!(joined.contains("-reconnect 1"));
        assert!(joined.contains("-reconnect_delay_max 5"));
        assert!(!joined.contains("-rtsp_transport"));
    }

    #[test]
    fn reconnect_delay_backs_off_to_cap() {
        let max = Duration::from_secs(5);
        let delays: Vec<_> = (0..6).map(|n| reconnect_delay(n, max)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[3], Duration::from_secs(4));
        assert_eq!(delays[4], max);
        assert_eq!(delays[5], max);
        assert_eq!(reconnect_delay(u32::MAX, max), max);
        assert_eq!(reconnect_delay(0, Duration::ZERO), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn missing_tool_fails_preflight_every_time() {
        let ffmpeg = FfmpegHls::new("/nonexistent/ffmpeg-binary", HlsConfig::default());
        let supervisor = EncoderSupervisor::new(Arc::new(ffmpeg), Duration::from_secs(1));

        assert!(matches!(
            supervisor.preflight().await,
            Err(StreamError::ToolUnavailable(_))
        ));
        assert!(matches!(
            supervisor.preflight().await,
            Err(StreamError::ToolUnavailable(_))
        ));

        let tmp = TempDir::new().unwrap();
        let session = new_session(tmp.path().join("cam"));
        let registry = Arc::new(SessionRegistry::new());
        let result = supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await;
        assert!(matches!(result, Err(StreamError::ToolUnavailable(_))));
        assert!(session.is_terminated());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crash_keeps_diagnostic_tail() {
        let tmp = TempDir::new().unwrap();
        let encoder = ShellEncoder::new("echo 'Connection refused' >&2; exit 1");
        let supervisor = EncoderSupervisor::new(Arc::new(encoder), Duration::from_secs(1));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        assert!(tmp.path().join("cam").is_dir());

        let record = timeout(Duration::from_secs(5), session.wait_exit())
            .await
            .unwrap();
        assert_eq!(record.code, Some(1));
        assert!(record.is_crash());
        assert!(record.diagnostics.contains("Connection refused"));
        assert!(session.is_terminated());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn active_session_respawns_after_source_loss() {
        let tmp = TempDir::new().unwrap();
        // First run drops out, every later run keeps going
        let encoder = Arc::new(ShellEncoder::new(
            r#"if [ -f "$OUT/.ran" ]; then exec sleep 30; fi
touch "$OUT/.ran"
echo 'Connection reset by peer' >&2
sleep 0.3
exit 1"#,
        ));
        let supervisor = EncoderSupervisor::new(encoder.clone(), Duration::from_secs(1))
            .with_reconnect_delay(Duration::from_millis(100));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));
        session.advance(SessionState::Starting);
        session.advance(SessionState::Active);

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        let first_pid = session.pid().await;

        for _ in 0..60 {
            if encoder.spawned() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(encoder.spawned(), 2);
        assert_eq!(session.restarts(), 1);
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.exit_record().is_none());
        assert_ne!(session.pid().await, first_pid);
        assert!(session
            .diagnostics()
            .snapshot()
            .await
            .contains("Connection reset by peer"));

        // the original stop channel still reaches the respawned process
        supervisor.stop(&session).await;
        let record = session.exit_record().unwrap();
        assert!(record.stop_requested);
        assert_eq!(encoder.spawned(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn starting_session_is_not_respawned() {
        let tmp = TempDir::new().unwrap();
        let encoder = Arc::new(ShellEncoder::new("sleep 0.1; exit 1"));
        let supervisor = EncoderSupervisor::new(encoder.clone(), Duration::from_secs(1))
            .with_reconnect_delay(Duration::from_millis(100));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));
        session.advance(SessionState::Starting);

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        let record = timeout(Duration::from_secs(5), session.wait_exit())
            .await
            .unwrap();

        assert!(record.is_crash());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(encoder.spawned(), 1);
        assert_eq!(session.restarts(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_running_process() {
        let tmp = TempDir::new().unwrap();
        let encoder = ShellEncoder::new("exec sleep 30");
        let supervisor = EncoderSupervisor::new(Arc::new(encoder), Duration::from_secs(2));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        assert!(session.pid().await.is_some());

        let started = std::time::Instant::now();
        supervisor.stop(&session).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let record = session.exit_record().unwrap();
        assert!(record.stop_requested);
        assert!(!record.is_crash());
        assert!(session.is_terminated());

        // second stop is a no-op
        supervisor.stop(&session).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_escalates_to_kill() {
        let tmp = TempDir::new().unwrap();
        let encoder = ShellEncoder::new("trap '' TERM; while true; do sleep 0.1; done");
        let supervisor = EncoderSupervisor::new(Arc::new(encoder), Duration::from_millis(300));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.stop(&session).await;
        let record = session.exit_record().unwrap();
        // SIGKILL leaves no exit code
        assert_eq!(record.code, None);
        assert!(record.stop_requested);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_session_stops_process() {
        let tmp = TempDir::new().unwrap();
        let encoder = ShellEncoder::new("exec sleep 30");
        let supervisor = EncoderSupervisor::new(Arc::new(encoder), Duration::from_secs(1));
        let registry = Arc::new(SessionRegistry::new());
        let session = new_session(tmp.path().join("cam"));

        supervisor
            .start(&session, Arc::downgrade(&registry), &paths(tmp.path()))
            .await
            .unwrap();
        let pid = session.pid().await.unwrap() as i32;
        drop(session);

        let mut gone = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            // signal 0 probes for existence; reaped processes report ESRCH
            if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
                gone = true;
                break;
            }
        }
        assert!(gone);
    }
}
