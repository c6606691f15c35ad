use crate::camera::{CameraConnection, CameraKind};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub hls: HlsConfig,
    /// Static camera directory
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen: String,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    #[serde(default = "default_supervisor_interval")]
    pub supervisor_interval_ms: u64,

    /// Root directory for HLS output.
    /// Pointing this at /dev/shm/camlink keeps segment churn off flash storage.
    #[serde(default = "default_hls_root")]
    pub hls_root: String,

    /// URL prefix under which the HLS root is served
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for the advisory connectivity probe
    pub probe_timeout_ms: u64,
    /// Pause after spawning a new encoder before answering the caller
    pub settle_delay_ms: u64,
    /// Time between SIGTERM and force-kill
    pub stop_grace_ms: u64,
    /// Stop sessions nobody has fetched for this long (0 disables)
    pub idle_timeout_secs: u64,
    /// Manifest age after which an active session is reported stale
    pub stale_after_secs: u64,
    /// Refuse to spawn encoders below this much free memory
    pub min_free_memory_kb: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5000,
            settle_delay_ms: 2000,
            stop_grace_ms: 3000,
            idle_timeout_secs: 0,
            stale_after_secs: 10,
            min_free_memory_kb: 5120,
        }
    }
}

impl SessionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HlsConfig {
    /// Target segment duration in seconds
    pub segment_secs: u32,
    /// Number of segments kept in the sliding window
    pub window: usize,
    /// Maximum delay between reconnect attempts, both inside ffmpeg for
    /// HTTP-family sources and between encoder respawns
    pub reconnect_delay_max_secs: u32,
    /// Socket I/O timeout for RTSP sources
    pub io_timeout_secs: u32,
    /// Lines of encoder stderr kept for crash reports
    pub diagnostic_tail_lines: usize,
    /// Codec arguments placed between the input and the HLS muxer options
    pub encode_args: Vec<String>,
}

impl HlsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.reconnect_delay_max_secs))
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_secs: 2,
            window: 5,
            reconnect_delay_max_secs: 5,
            io_timeout_secs: 10,
            diagnostic_tail_lines: 50,
            encode_args: default_encode_args(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub kind: CameraKind,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
}

impl From<&CameraConfig> for CameraConnection {
    fn from(cfg: &CameraConfig) -> Self {
        CameraConnection {
            address: cfg.address.clone(),
            kind: cfg.kind.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            port: cfg.port,
            path: cfg.path.clone(),
            stream_url: cfg.stream_url.clone(),
        }
    }
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_supervisor_interval() -> u64 {
    2000
}

fn default_hls_root() -> String {
    "./media/live".to_string()
}

fn default_public_prefix() -> String {
    "/hls".to_string()
}

/// Browser-friendly H.264 baseline + AAC with a fixed GOP matching the segment length.
fn default_encode_args() -> Vec<String> {
    [
        "-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency",
        "-profile:v", "baseline", "-level", "3.0", "-pix_fmt", "yuv420p",
        "-g", "30", "-keyint_min", "30", "-sc_threshold", "0",
        "-c:a", "aac", "-ar", "44100", "-b:a", "128k",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.hls.window == 0 {
            anyhow::bail!("hls.window must be at least 1");
        }
        Ok(config)
    }
}
