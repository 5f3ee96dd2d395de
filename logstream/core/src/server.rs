//! HTTP Surface
//!
//! axum router exposing the gateway:
//!
//! - `GET /logs/{id}` and `GET /docker/logs/{id}` - websocket log streaming
//! - `GET /health` - Log Source reachability
//!
//! The Log Source subscription is opened before the websocket upgrade is
//! accepted, so a failing source is reported as a plain HTTP error and no
//! session is created.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures::{future, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::options::{LogsQuery, StreamOptions};
use crate::session::{Inbound, Outbound, Session, SessionHandle, SessionId};
use crate::source::{LogSource, LogStream, SourceError};

/// Shared state behind the router
pub struct AppState {
    source: Arc<dyn LogSource>,
    config: GatewayConfig,
    shutdown: CancellationToken,
    sessions: DashMap<SessionId, SessionHandle>,
}

impl AppState {
    /// Create state for a gateway serving `source`
    ///
    /// Every session ends once `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        source: Arc<dyn LogSource>,
        config: GatewayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            config,
            shutdown,
            sessions: DashMap::new(),
        }
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Number of sessions currently served
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the running sessions
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Server-wide shutdown token
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("source", &self.source.name())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/logs/:id", get(handle_logs))
        .route("/docker/logs/:id", get(handle_logs))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve the router on `listener` until the shutdown token fires
///
/// # Errors
///
/// Returns the listener's I/O error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Handle a log streaming upgrade request
async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let options = StreamOptions::from_query(id.as_str(), &query, state.config.stream.default_tail);
    let session =
        Session::new(options, state.config.stream.clone()).with_shutdown(&state.shutdown);
    let peer = peer.map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.to_string());
    let span = tracing::info_span!(
        "session",
        session_id = %session.id(),
        target = %id,
        peer = %peer
    );

    let subscribed = state
        .source
        .subscribe(&id, session.options(), session.control().child_token())
        .instrument(span.clone())
        .await;
    let stream = match subscribed {
        Ok(stream) => stream,
        Err(e @ SourceError::InvalidTarget(_)) => {
            tracing::warn!(parent: &span, error = %e, "Rejected log request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => {
            tracing::warn!(
                parent: &span,
                error = %e,
                source = state.source.name(),
                "Subscribe failed"
            );
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    tracing::info!(
        parent: &span,
        follow = session.options().follow,
        tail = %session.options().tail,
        "New log streaming connection"
    );

    let failed_span = span.clone();
    ws.max_message_size(state.config.server.read_limit_bytes)
        .on_failed_upgrade(move |e| {
            tracing::warn!(parent: &failed_span, error = %e, "Websocket upgrade failed");
        })
        .on_upgrade(move |socket| serve_session(state, session, stream, socket).instrument(span))
}

/// Run one upgraded session and keep the registry current
async fn serve_session(
    state: Arc<AppState>,
    session: Session,
    stream: LogStream,
    socket: WebSocket,
) {
    let handle = session.handle();
    state.sessions.insert(handle.id.clone(), handle);
    tracing::debug!(active = state.sessions.len(), "Session registered");

    let (sink, inbound) = socket.split();
    let sink = sink.with(|message: Outbound| {
        future::ready(Ok::<Message, axum::Error>(to_ws_message(message)))
    });
    let inbound = inbound.map(|frame| frame.map(from_ws_message));

    // Outcome is logged by the session itself
    let _ = session.run(stream, sink, inbound).await;

    state.sessions.remove(session.id());
    tracing::debug!(active = state.sessions.len(), "Session unregistered");
}

/// Handle a health check
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    if state.source.health_check().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(source = state.source.name(), "Log source health check failed");
        (StatusCode::SERVICE_UNAVAILABLE, "Log source unavailable").into_response()
    }
}

fn to_ws_message(message: Outbound) -> Message {
    match message {
        Outbound::Text(line) => Message::Text(line),
        Outbound::Ping => Message::Ping(Vec::new()),
        Outbound::Close => Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(""),
        })),
    }
}

fn from_ws_message(message: Message) -> Inbound {
    match message {
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Other,
    }
}
