use crate::camera::{CameraConnection, CameraDirectory, StaticCameraDirectory};
use crate::config::AppConfig;
use crate::encoder::{EncoderCommand, EncoderSupervisor, FfmpegHls};
use crate::prober::{ConnectivityProber, FfmpegProber};
use crate::publisher::SegmentPublisher;
use crate::registry::SessionRegistry;
use std::sync::Arc;

/// Application context, built once at startup and handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    /// Camera metadata lookups
    pub directory: Arc<dyn CameraDirectory>,
    /// Advisory reachability check
    pub prober: Arc<dyn ConnectivityProber>,
    /// Encoder process lifecycle
    pub encoder: Arc<EncoderSupervisor>,
    /// Camera ID -> running session
    pub registry: Arc<SessionRegistry>,
    /// HLS output layout
    pub publisher: SegmentPublisher,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wires the production components from configuration.
    pub fn from_config(config: AppConfig) -> Self {
        let directory = StaticCameraDirectory::new(
            config
                .cameras
                .iter()
                .map(|c| (c.id.clone(), CameraConnection::from(c))),
        );
        let prober = FfmpegProber::new(&config.server.ffmpeg_binary, config.session.probe_timeout());
        let command = FfmpegHls::new(&config.server.ffmpeg_binary, config.hls.clone());

        Self::with_components(config, Arc::new(directory), Arc::new(prober), Arc::new(command))
    }

    pub fn with_components(
        config: AppConfig,
        directory: Arc<dyn CameraDirectory>,
        prober: Arc<dyn ConnectivityProber>,
        command: Arc<dyn EncoderCommand>,
    ) -> Self {
        let publisher = SegmentPublisher::new(
            &config.server.hls_root,
            &config.server.public_prefix,
            config.hls.window,
        );
        let encoder = EncoderSupervisor::new(command, config.session.stop_grace())
            .with_reconnect_delay(config.hls.reconnect_delay());

        Self {
            config,
            directory,
            prober,
            encoder: Arc::new(encoder),
            registry: Arc::new(SessionRegistry::new()),
            publisher,
        }
    }
}
