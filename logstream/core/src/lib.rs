//! Logstream Core - Websocket Log Streaming Gateway
//!
//! This crate turns a container log byte stream into discrete text messages
//! delivered over a websocket. It knows nothing about the process it runs in;
//! the daemon crate wires it to a listener, signals and configuration files.
//!
//! # Architecture
//!
//! ```text
//!   Log Source (Docker Engine)
//!          │  raw bytes, optionally 8-byte framed
//!          ▼
//!   ┌──────────────┐   owned lines   ┌─────────────┐   text / ping / close
//!   │ Reader task  │ ──────────────▶ │ Relay Queue │ ───▶ Writer task ───▶ client
//!   │ (backpressure│                 │ (bounded)   │
//!   │  policy)     │                 └─────────────┘      Disconnect watcher
//!   └──────────────┘                                        ◀─── pong / close
//! ```
//!
//! Follow mode runs the pipeline above until either side ends it. Tail mode
//! collects the most recent lines once, sends them and closes.
//!
//! # Key Types
//!
//! - [`LogSource`]: Collaborator that yields a log byte stream for a target
//! - [`Session`]: One client connection, in tail or follow mode
//! - [`StreamOptions`]: Per-session request options
//! - [`GatewayConfig`]: Layered configuration (defaults, file, env, CLI)
//! - [`router`]: axum router exposing `/logs/{id}` and `/health`
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use logstream_core::{load_config, serve, AppState, DockerLogSource};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let source = DockerLogSource::from_config(&config.docker)?;
//!     let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
//!     let state = AppState::new(Arc::new(source), config, CancellationToken::new());
//!     serve(listener, Arc::new(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod demux;
pub mod options;
pub mod relay;
pub mod server;
pub mod session;
pub mod source;

// Re-export main types for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DockerConfig, DockerEndpoint, GatewayConfig, ServerConfig, StreamConfig,
    DEFAULT_DOCKER_SOCKET,
};
pub use demux::{demux, demux_text, encode_frame, DemuxLines, FrameHeader, StreamType, HEADER_SIZE};
pub use options::{parse_bool, LogsQuery, StreamOptions, Tail, DEFAULT_TAIL};
pub use relay::{relay_queue, Enqueued, RelayConsumer, RelayError, RelayProducer};
pub use server::{router, serve, AppState};
pub use session::{
    Inbound, Outbound, Session, SessionControl, SessionEnd, SessionError, SessionHandle,
    SessionId, SessionPhase,
};
pub use source::{validate_target, DockerLogSource, LineReader, LogSource, LogStream, SourceError};
