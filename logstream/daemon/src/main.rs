//! Logstream Daemon - Websocket Log Streaming Gateway
//!
//! Serves container logs from a Docker Engine endpoint to browser clients
//! over websockets.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8080, engine at /var/run/docker.sock)
//! logstream-daemon
//!
//! # Custom listener and engine
//! logstream-daemon --bind 127.0.0.1:9000 --docker-host tcp://10.0.0.5:2375
//!
//! # With config file
//! logstream-daemon --config /etc/logstream/gateway.toml
//!
//! # Verbose logging
//! RUST_LOG=debug logstream-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown; every open session is ended

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use logstream_core::{load_config, load_config_from_path, ConfigOverrides, GatewayConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use server::GatewayServer;

/// Logstream Daemon - Websocket log streaming gateway
#[derive(Parser, Debug)]
#[command(name = "logstream-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listen address for HTTP and websocket clients
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "LOGSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Docker Engine endpoint (unix:///path, tcp://host:port or http://host:port)
    #[arg(long, value_name = "URL")]
    docker_host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "LOGSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// CLI values that take precedence over every other source
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(bind) = self.bind {
            overrides = overrides.with_bind(bind);
        }
        if let Some(ref host) = self.docker_host {
            overrides = overrides.with_docker_host(host.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "logstream_daemon={level},logstream_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load the layered configuration and apply CLI overrides
fn resolve_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_config().context("Failed to load config")?,
    };

    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        file = ?config.config_file_path,
        bind = %config.server.bind,
        docker = %config.docker.endpoint,
        "Configuration loaded"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Logstream daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = resolve_config(&args)?;

    // Install signal handlers before accepting anything
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        signal_token.cancel();
    });

    let server = GatewayServer::new(config, shutdown);
    match server.run().await {
        Ok(()) => {
            info!("Logstream daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
