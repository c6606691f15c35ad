use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a stream session. "Idle" is the absence of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Probing,
    Starting,
    Active,
    Stopping,
    Terminated,
}

impl SessionState {
    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) | (_, Stopping) => true,
            (Probing, Starting) | (Starting, Active) => true,
            _ => false,
        }
    }
}

/// How an encoder process ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitRecord {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// Last lines of diagnostic output
    pub diagnostics: String,
    /// The exit followed a stop request
    pub stop_requested: bool,
    pub at: DateTime<Utc>,
}

impl ExitRecord {
    /// An exit nobody asked for, or a non-zero code
    pub fn is_crash(&self) -> bool {
        !self.stop_requested && self.code != Some(0)
    }
}

/// Rolling buffer of the most recent diagnostic lines of a process
#[derive(Debug)]
pub struct DiagnosticTail {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, line: String) {
        let mut lines = self.lines.lock().await;
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub async fn snapshot(&self) -> String {
        let lines = self.lines.lock().await;
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Handles the supervisor leaves on the session so it can be stopped later
#[derive(Debug)]
struct ProcessControl {
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// One supervised transcode attempt for a camera.
///
/// Owned by the registry. The encoder supervisor only keeps a `Weak` to it
/// and reports the process exit through [`StreamSession::record_exit`].
/// Dropping the session drops the stop channel, which the supervisor treats
/// as a stop request.
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    camera_id: String,
    source_url: String,
    publish_path: String,
    output_dir: PathBuf,
    created_at: DateTime<Utc>,
    last_healthy_ms: AtomicI64,
    last_accessed_ms: AtomicI64,
    state: watch::Sender<SessionState>,
    exit: watch::Sender<Option<ExitRecord>>,
    process: Mutex<Option<ProcessControl>>,
    diagnostics: std::sync::Arc<DiagnosticTail>,
    /// Encoder respawns after source interruptions
    restarts: AtomicU32,
}

impl StreamSession {
    pub fn new(
        camera_id: &str,
        source_url: String,
        publish_path: String,
        output_dir: PathBuf,
        tail_lines: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            camera_id: camera_id.to_string(),
            source_url,
            publish_path,
            output_dir,
            created_at: now,
            last_healthy_ms: AtomicI64::new(now.timestamp_millis()),
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            state: watch::Sender::new(SessionState::Probing),
            exit: watch::Sender::new(None),
            process: Mutex::new(None),
            diagnostics: std::sync::Arc::new(DiagnosticTail::new(tail_lines)),
            restarts: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn publish_path(&self) -> &str {
        &self.publish_path
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it did.
    pub fn advance(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_become(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated
    }

    /// Probing, starting or active
    pub fn is_live(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Probing | SessionState::Starting | SessionState::Active
        )
    }

    pub fn mark_healthy(&self) {
        self.last_healthy_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_healthy(&self) -> DateTime<Utc> {
        from_millis(self.last_healthy_ms.load(Ordering::Relaxed))
    }

    /// Records client interest (manifest or segment fetch)
    pub fn touch(&self) {
        self.last_accessed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_accessed_ms.load(Ordering::Relaxed);
        let elapsed = Utc::now().timestamp_millis().saturating_sub(last);
        Duration::from_millis(elapsed.max(0) as u64)
    }

    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    pub fn diagnostics(&self) -> std::sync::Arc<DiagnosticTail> {
        self.diagnostics.clone()
    }

    pub(crate) async fn attach_process(&self, pid: Option<u32>, stop_tx: oneshot::Sender<()>) {
        *self.process.lock().await = Some(ProcessControl {
            pid,
            stop_tx: Some(stop_tx),
        });
    }

    /// Points the session at a respawned process; the stop channel stays.
    pub(crate) async fn replace_pid(&self, pid: Option<u32>) {
        if let Some(control) = self.process.lock().await.as_mut() {
            control.pid = pid;
        }
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid)
    }

    /// Asks the supervising task to stop the process. Returns false when no
    /// process is attached or a stop was already requested.
    pub(crate) async fn request_stop(&self) -> bool {
        let tx = self
            .process
            .lock()
            .await
            .as_mut()
            .and_then(|p| p.stop_tx.take());
        match tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub(crate) async fn has_process(&self) -> bool {
        self.process.lock().await.is_some()
    }

    pub(crate) fn record_exit(&self, record: ExitRecord) {
        self.state.send_replace(SessionState::Terminated);
        self.exit.send_replace(Some(record));
    }

    pub fn exit_record(&self) -> Option<ExitRecord> {
        self.exit.borrow().clone()
    }

    /// Resolves once the process has exited.
    pub async fn wait_exit(&self) -> ExitRecord {
        let mut rx = self.exit.subscribe();
        loop {
            if let Some(record) = rx.borrow_and_update().clone() {
                return record;
            }
            // The sender lives in `self`, so this only errors if we are gone
            if rx.changed().await.is_err() {
                return self.exit_record().unwrap_or_else(|| ExitRecord {
                    code: None,
                    diagnostics: String::new(),
                    stop_requested: true,
                    at: Utc::now(),
                });
            }
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
