//! Docker Log Source
//!
//! Streams service logs from a Docker Engine API endpoint, either over TCP
//! (`http://host:port`) or over the engine's unix socket
//! (`unix:///var/run/docker.sock`).
//!
//! # Docker API
//!
//! - `/{version}/services/{id}/logs` - Multiplexed service log stream
//! - `/_ping` - Liveness check
//!
//! The response body is handed to the gateway untouched. Demultiplexing of
//! the 8-byte frame headers happens on the gateway side.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use reqwest::Url;
use serde::Deserialize;
use tokio::net::UnixStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::{validate_target, LogSource, LogStream, SourceError};
use crate::config::{DockerConfig, DockerEndpoint};
use crate::options::StreamOptions;

/// Host header sent over the unix socket; the engine ignores it
const SOCKET_HOST: &str = "docker";

/// Upper bound for a `/_ping` round trip
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Error bodies longer than this are cut
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Error body returned by the engine
#[derive(Debug, Deserialize)]
struct EngineError {
    message: String,
}

/// Extract the engine's error message, falling back to the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<EngineError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// How requests reach the engine
#[derive(Clone, Debug)]
enum Transport {
    /// TCP through a pooled HTTP client
    Http {
        base: String,
        client: reqwest::Client,
    },
    /// One HTTP/1.1 connection per request over the engine socket
    Unix { socket_path: PathBuf },
}

/// Status and body of an engine response
struct EngineResponse {
    status: u16,
    body: BoxStream<'static, io::Result<Bytes>>,
}

impl EngineResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into the engine's error message
    async fn into_error(mut self) -> SourceError {
        let mut buf = Vec::new();
        while let Some(Ok(chunk)) = self.body.next().await {
            buf.extend_from_slice(&chunk);
            if buf.len() >= MAX_ERROR_BODY {
                buf.truncate(MAX_ERROR_BODY);
                break;
            }
        }
        SourceError::Status {
            status: self.status,
            message: error_message(&String::from_utf8_lossy(&buf)),
        }
    }
}

/// Docker Engine log source
#[derive(Clone, Debug)]
pub struct DockerLogSource {
    /// TCP or unix socket transport
    transport: Transport,
    /// API version path segment (e.g. `v1.41`)
    api_version: Option<String>,
    /// Bound on establishing a connection
    connect_timeout: Duration,
}

impl DockerLogSource {
    /// Create a Docker log source
    ///
    /// Only the connect phase is bounded by `connect_timeout`. Follow-mode
    /// responses stay open indefinitely, so no total request timeout is set.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Request`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: DockerEndpoint,
        api_version: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let transport = match endpoint {
            DockerEndpoint::Http(base) => {
                let client = reqwest::Client::builder()
                    .connect_timeout(connect_timeout)
                    .build()
                    .map_err(|e| {
                        SourceError::Request(format!("Failed to create HTTP client: {e}"))
                    })?;
                Transport::Http {
                    base: base.trim_end_matches('/').to_string(),
                    client,
                }
            }
            DockerEndpoint::Unix(socket_path) => Transport::Unix { socket_path },
        };

        Ok(Self {
            transport,
            api_version: api_version.filter(|v| !v.is_empty()),
            connect_timeout,
        })
    }

    /// Create from `DockerConfig`
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Request`] for an unsupported endpoint, otherwise
    /// see [`DockerLogSource::new`].
    pub fn from_config(config: &DockerConfig) -> Result<Self, SourceError> {
        let endpoint = DockerEndpoint::parse(&config.endpoint).ok_or_else(|| {
            SourceError::Request(format!("Unsupported Docker endpoint {:?}", config.endpoint))
        })?;
        Self::new(endpoint, config.api_version.clone(), config.connect_timeout)
    }

    /// Get the service logs path
    fn logs_path(&self, target: &str) -> String {
        match &self.api_version {
            Some(version) => format!("/{version}/services/{target}/logs"),
            None => format!("/services/{target}/logs"),
        }
    }

    /// Absolute request URL for `path`
    ///
    /// Socket requests use a placeholder host; only the path and query are
    /// put on the wire.
    fn request_url(&self, path: &str, query: &[(&'static str, String)]) -> Result<Url, SourceError> {
        let base = match &self.transport {
            Transport::Http { base, .. } => base.clone(),
            Transport::Unix { .. } => format!("http://{SOCKET_HOST}"),
        };
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| SourceError::Request(format!("Invalid engine URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    /// Query parameters forwarded to the engine
    fn logs_query(options: &StreamOptions) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("follow", options.follow.to_string()),
            ("stdout", options.stdout.to_string()),
            ("stderr", options.stderr.to_string()),
            ("timestamps", options.timestamps.to_string()),
            ("details", options.details.to_string()),
            ("tail", options.tail.to_string()),
        ];
        if !options.since.is_empty() {
            query.push(("since", options.since.clone()));
        }
        query
    }

    /// Issue a GET and return the status with a streaming body
    async fn get(&self, url: Url) -> Result<EngineResponse, SourceError> {
        match &self.transport {
            Transport::Http { client, .. } => {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| SourceError::Request(e.to_string()))?;
                Ok(EngineResponse {
                    status: response.status().as_u16(),
                    body: response.bytes_stream().map_err(io::Error::other).boxed(),
                })
            }
            Transport::Unix { socket_path } => {
                let response = unix_get(socket_path, &url, self.connect_timeout).await?;
                Ok(EngineResponse {
                    status: response.status().as_u16(),
                    body: response
                        .into_body()
                        .into_data_stream()
                        .map_err(io::Error::other)
                        .boxed(),
                })
            }
        }
    }
}

/// Send a GET over a fresh connection to the engine socket
async fn unix_get(
    socket_path: &Path,
    url: &Url,
    connect_timeout: Duration,
) -> Result<hyper::Response<hyper::body::Incoming>, SourceError> {
    let stream = tokio::time::timeout(connect_timeout, UnixStream::connect(socket_path))
        .await
        .map_err(|_| {
            SourceError::Request(format!("Timed out connecting to {}", socket_path.display()))
        })?
        .map_err(|e| {
            SourceError::Request(format!("Failed to connect to {}: {e}", socket_path.display()))
        })?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| SourceError::Request(format!("HTTP handshake failed: {e}")))?;
    // Ends once the response body is finished or dropped
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Docker socket connection failed");
        }
    });

    let path_and_query = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let request = hyper::Request::get(path_and_query)
        .header(hyper::header::HOST, SOCKET_HOST)
        .body(Empty::<Bytes>::new())
        .map_err(|e| SourceError::Request(e.to_string()))?;

    sender
        .send_request(request)
        .await
        .map_err(|e| SourceError::Request(e.to_string()))
}

#[async_trait]
impl LogSource for DockerLogSource {
    fn name(&self) -> &str {
        "docker"
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.request_url("/_ping", &[]) else {
            return false;
        };
        matches!(
            tokio::time::timeout(PING_TIMEOUT, self.get(url)).await,
            Ok(Ok(response)) if response.is_success()
        )
    }

    async fn subscribe(
        &self,
        target: &str,
        options: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<LogStream, SourceError> {
        validate_target(target)?;

        let url = self.request_url(&self.logs_path(target), &Self::logs_query(options))?;
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(response.into_error().await);
        }

        tracing::debug!(target_id = %target, "Docker log stream opened");

        let body = response
            .body
            .take_until(cancel.clone().cancelled_owned());

        Ok(LogStream::new(StreamReader::new(body), cancel))
    }
}
