//! Gateway Server
//!
//! Wires the core router to a TCP listener and the Docker log source:
//! - Builds the Docker Engine client from configuration
//! - Binds the listener and serves HTTP/websocket clients
//! - Stops accepting on shutdown; open sessions end through their
//!   child cancellation tokens

use std::sync::Arc;

use anyhow::{Context, Result};
use logstream_core::{serve, AppState, DockerLogSource, GatewayConfig, LogSource};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The gateway server
pub struct GatewayServer {
    /// Effective configuration
    config: GatewayConfig,
    /// Cancelled on SIGTERM/SIGINT
    shutdown: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Serve until the shutdown token fires
    pub async fn run(self) -> Result<()> {
        let source = DockerLogSource::from_config(&self.config.docker)
            .context("Failed to create Docker log source")?;

        if source.health_check().await {
            info!(endpoint = %self.config.docker.endpoint, "Docker Engine reachable");
        } else {
            // Sessions will fail with 502 until the engine comes up
            warn!(endpoint = %self.config.docker.endpoint, "Docker Engine not reachable");
        }

        let bind = self.config.server.bind;
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind {bind}"))?;
        let local_addr = listener.local_addr().context("Failed to read local address")?;
        info!(addr = %local_addr, "Listening for log streaming clients");

        let state = Arc::new(AppState::new(
            Arc::new(source),
            self.config,
            self.shutdown.clone(),
        ));

        let result = serve(listener, Arc::clone(&state)).await;

        info!(
            active_sessions = state.active_sessions(),
            "Stopped accepting connections"
        );
        result.context("HTTP server failed")
    }
}
