//! Gateway Configuration
//!
//! Centralized configuration loading for the log streaming gateway, backed by
//! a TOML file at `~/.config/logstream/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! read_limit_bytes = 1048576
//!
//! [docker]
//! endpoint = "unix:///var/run/docker.sock"
//! api_version = "v1.41"
//! connect_timeout_ms = 5000
//!
//! [stream]
//! relay_capacity = 64
//! grace_window_ms = 50
//! drain_wait_ms = 2000
//! keepalive_secs = 54
//! read_timeout_secs = 60
//! write_timeout_secs = 10
//! tail_idle_ms = 100
//! default_tail = 20
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::DEFAULT_TAIL;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Listener settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind: SocketAddr,
    /// Maximum size of a single inbound websocket message
    pub read_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            read_limit_bytes: 1024 * 1024,
        }
    }
}

/// Engine socket used when nothing else is configured
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// How the Docker Engine API is reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Plain HTTP base URL, without a trailing slash
    Http(String),
    /// Unix domain socket path
    Unix(PathBuf),
}

impl DockerEndpoint {
    /// Parse a normalized endpoint (`http://host:port` or `unix:///path`)
    ///
    /// TLS endpoints are not supported and yield `None`.
    #[must_use]
    pub fn parse(endpoint: &str) -> Option<Self> {
        if let Some(path) = endpoint.strip_prefix("unix://") {
            return (!path.is_empty()).then(|| Self::Unix(PathBuf::from(path)));
        }
        let host = endpoint.strip_prefix("http://")?;
        if host.trim_matches('/').is_empty() {
            return None;
        }
        Some(Self::Http(endpoint.trim_end_matches('/').to_string()))
    }
}

impl fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Docker Engine endpoint settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DockerConfig {
    /// Engine endpoint, `http://host:port` or `unix:///path`
    pub endpoint: String,
    /// API version path prefix, if any
    pub api_version: Option<String>,
    /// Connect timeout for engine requests
    pub connect_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("unix://{DEFAULT_DOCKER_SOCKET}"),
            api_version: Some("v1.41".to_string()),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-session streaming policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Relay queue capacity in chunks
    pub relay_capacity: usize,
    /// How long the reader waits for queue space before evicting
    pub grace_window: Duration,
    /// How long an evicted session waits for its writer to drain
    pub drain_wait: Duration,
    /// Interval between keepalive pings
    pub keepalive_interval: Duration,
    /// Client read deadline, refreshed on every pong
    pub read_timeout: Duration,
    /// Deadline for a single outbound message
    pub write_timeout: Duration,
    /// Tail mode idle window between lines
    pub tail_idle: Duration,
    /// Tail mode wait for the very first line
    pub tail_first_line_wait: Duration,
    /// Tail used when the request's value is unusable
    pub default_tail: usize,
    /// Cap on a single upstream line
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            relay_capacity: 64,
            grace_window: Duration::from_millis(50),
            drain_wait: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            tail_idle: Duration::from_millis(100),
            tail_first_line_wait: Duration::from_secs(2),
            default_tail: DEFAULT_TAIL,
            max_line_bytes: 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Set relay queue capacity
    #[must_use]
    pub fn with_relay_capacity(mut self, capacity: usize) -> Self {
        self.relay_capacity = capacity;
        self
    }

    /// Set keepalive interval
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set client read deadline
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set per-message write deadline
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set tail mode idle window
    #[must_use]
    pub fn with_tail_idle(mut self, idle: Duration) -> Self {
        self.tail_idle = idle;
        self
    }

    /// Check values that would stall or break a session
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream.relay_capacity must be at least 1".to_string(),
            ));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "stream.keepalive_secs must be non-zero".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "stream.write_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.read_timeout <= self.keepalive_interval {
            tracing::warn!(
                read_timeout = ?self.read_timeout,
                keepalive = ?self.keepalive_interval,
                "Read deadline does not exceed keepalive interval; idle clients will time out"
            );
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "stream.max_line_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Centralized configuration for the gateway
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Listener configuration
    pub server: ServerConfig,

    /// Docker Engine configuration
    pub docker: DockerConfig,

    /// Streaming policy
    pub stream: StreamConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            docker: DockerConfig::default(),
            stream: StreamConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Validate the whole configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.read_limit_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "server.read_limit_bytes must be at least 1".to_string(),
            ));
        }
        if DockerEndpoint::parse(&self.docker.endpoint).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "docker.endpoint must be an http:// URL or a unix:// socket, got {:?}",
                self.docker.endpoint
            )));
        }
        self.stream.validate()
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address (e.g. "0.0.0.0:8080")
    pub bind: Option<String>,

    /// Websocket read limit in bytes
    pub read_limit_bytes: Option<usize>,
}

/// Docker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerToml {
    /// Engine endpoint (`tcp://` is rewritten to `http://`, `unix://` is kept)
    pub endpoint: Option<String>,

    /// API version prefix; empty disables it
    pub api_version: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Relay queue capacity
    pub relay_capacity: Option<usize>,

    /// Slow-client grace window in milliseconds
    pub grace_window_ms: Option<u64>,

    /// Slow-client drain wait in milliseconds
    pub drain_wait_ms: Option<u64>,

    /// Keepalive interval in seconds
    pub keepalive_secs: Option<u64>,

    /// Read deadline in seconds
    pub read_timeout_secs: Option<u64>,

    /// Write deadline in seconds
    pub write_timeout_secs: Option<u64>,

    /// Tail idle window in milliseconds
    pub tail_idle_ms: Option<u64>,

    /// Tail first-line wait in milliseconds
    pub tail_first_line_wait_ms: Option<u64>,

    /// Default tail
    pub default_tail: Option<usize>,

    /// Maximum bytes per upstream line
    pub max_line_bytes: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Docker configuration section
    pub docker: DockerToml,

    /// Stream configuration section
    pub stream: StreamToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/logstream/gateway.toml` or
/// `~/.config/logstream/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("logstream").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Rewrite a `DOCKER_HOST`-style value into an endpoint
///
/// `tcp://` becomes `http://`, bare `host:port` gains `http://` and
/// `unix://` sockets are kept. Named pipes and TLS (`https://`) endpoints
/// are not supported and yield `None`.
#[must_use]
pub fn normalize_docker_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let endpoint = if raw.is_empty() || raw.starts_with("npipe://") || raw.starts_with("https://") {
        return None;
    } else if let Some(rest) = raw.strip_prefix("tcp://") {
        format!("http://{rest}")
    } else if raw.starts_with("http://") || raw.starts_with("unix://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    DockerEndpoint::parse(&endpoint).map(|_| endpoint)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) -> Result<(), ConfigError> {
    // Server settings
    if let Some(ref bind) = toml.server.bind {
        config.server.bind = bind.parse().map_err(|_| {
            ConfigError::ValidationError(format!("server.bind is not a socket address: {bind}"))
        })?;
    }
    if let Some(limit) = toml.server.read_limit_bytes {
        config.server.read_limit_bytes = limit;
    }

    // Docker settings
    if let Some(ref endpoint) = toml.docker.endpoint {
        config.docker.endpoint = normalize_docker_host(endpoint).ok_or_else(|| {
            ConfigError::ValidationError(format!("docker.endpoint is not supported: {endpoint}"))
        })?;
    }
    if let Some(ref version) = toml.docker.api_version {
        config.docker.api_version = Some(version.clone()).filter(|v| !v.is_empty());
    }
    if let Some(timeout) = toml.docker.connect_timeout_ms {
        config.docker.connect_timeout = Duration::from_millis(timeout);
    }

    // Stream settings
    let stream = &toml.stream;
    if let Some(capacity) = stream.relay_capacity {
        config.stream.relay_capacity = capacity;
    }
    if let Some(ms) = stream.grace_window_ms {
        config.stream.grace_window = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.drain_wait_ms {
        config.stream.drain_wait = Duration::from_millis(ms);
    }
    if let Some(secs) = stream.keepalive_secs {
        config.stream.keepalive_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = stream.read_timeout_secs {
        config.stream.read_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = stream.write_timeout_secs {
        config.stream.write_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = stream.tail_idle_ms {
        config.stream.tail_idle = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.tail_first_line_wait_ms {
        config.stream.tail_first_line_wait = Duration::from_millis(ms);
    }
    if let Some(tail) = stream.default_tail {
        config.stream.default_tail = tail;
    }
    if let Some(bytes) = stream.max_line_bytes {
        config.stream.max_line_bytes = bytes;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut GatewayConfig) {
    apply_env_config_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`
///
/// Values that fail to parse are ignored.
pub fn apply_env_config_from<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup("LOGSTREAM_BIND") {
        if let Ok(addr) = bind.parse::<SocketAddr>() {
            config.server.bind = addr;
            config.source = ConfigSource::Env;
        }
    }

    let docker_host = lookup("LOGSTREAM_DOCKER_HOST").or_else(|| lookup("DOCKER_HOST"));
    if let Some(host) = docker_host {
        match normalize_docker_host(&host) {
            Some(endpoint) => {
                config.docker.endpoint = endpoint;
                config.source = ConfigSource::Env;
            }
            None => tracing::warn!(host = %host, "Ignoring unsupported Docker host"),
        }
    }

    if let Some(secs) = lookup("LOGSTREAM_KEEPALIVE_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.stream.keepalive_interval = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = lookup("LOGSTREAM_RELAY_CAPACITY").and_then(|v| v.parse::<usize>().ok())
    {
        config.stream.relay_capacity = capacity;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("LOGSTREAM_WRITE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
    {
        config.stream.write_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("LOGSTREAM_READ_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.stream.read_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = lookup("LOGSTREAM_TAIL_IDLE_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.stream.tail_idle = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind address override
    pub bind: Option<SocketAddr>,

    /// Docker endpoint override
    pub docker_host: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set Docker endpoint override
    #[must_use]
    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an unsupported Docker host.
    pub fn apply(&self, config: &mut GatewayConfig) -> Result<(), ConfigError> {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.docker_host {
            config.docker.endpoint = normalize_docker_host(host).ok_or_else(|| {
                ConfigError::ValidationError(format!("unsupported Docker host: {host}"))
            })?;
            config.source = ConfigSource::Cli;
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
