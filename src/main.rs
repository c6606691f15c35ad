mod camera;
mod config;
mod encoder;
mod engine;
mod error;
mod prober;
mod publisher;
mod registry;
mod resolver;
mod session;
mod state;
mod supervisor;
#[cfg(test)]
mod testing;
mod web;

use clap::Parser;
use config::AppConfig;
use engine::Engine;
use state::AppState;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// camlink - on-demand RTSP to HLS gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "camlink.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    info!(
        "camlink initialized. HLS Root: {}, cameras: {}",
        config.server.hls_root,
        config.cameras.len()
    );

    let state = Arc::new(AppState::from_config(config));

    // Sessions would fail anyway; say so early
    if let Err(e) = state.encoder.preflight().await {
        warn!("{}", e);
    }

    let supervisor_interval = state.config.server.supervisor_interval_ms;
    tokio::spawn(supervisor::start_supervisor(
        state.clone(),
        supervisor_interval,
    ));

    let app = web::router(state.clone());

    info!("Listening on {}", state.config.server.listen);
    let listener = tokio::net::TcpListener::bind(&state.config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Engine::stop_all(&state).await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, stopping sessions");
}
