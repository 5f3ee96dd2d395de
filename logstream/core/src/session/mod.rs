//! Streaming Sessions
//!
//! A session serves one client connection for one log target. Depending on
//! the `follow` option it either collects a bounded tail and closes
//! ([`tail`]), or runs the reader/writer/watcher pipeline until one side
//! ends it ([`follow`]).
//!
//! The session is transport-agnostic: it writes [`Outbound`] messages into a
//! `Sink` and watches [`Inbound`] events from a `Stream`. The server adapts a
//! websocket to that shape; tests use in-memory channels.
//!
//! # Termination
//!
//! Termination is session-wide and goes through [`SessionControl`]. The first
//! task to detect a terminal condition records the reason and cancels the
//! session token; every other task observes the token at its next
//! suspension point and exits.

pub mod follow;
pub mod tail;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, Stream};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::options::StreamOptions;
use crate::source::LogStream;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session ID
    #[must_use]
    pub fn new() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(format!("sess_{}", hex::encode(bytes)))
    }

    /// Get the ID as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport handshake not finished yet
    Upgrading,
    /// Lines are flowing to the client
    Streaming,
    /// Upstream is done; queued lines are being flushed
    Draining,
    /// Session is over
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrading => write!(f, "upgrading"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session was torn down
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Log Source read failed mid-stream
    #[error("Log source read failed: {0}")]
    SourceRead(String),

    /// Transmit to the client failed
    #[error("Write to client failed: {0}")]
    Write(String),

    /// Transmit to the client did not finish within the write deadline
    #[error("Write to client timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Client did not drain the relay queue in time
    #[error("Client too slow to drain the relay queue")]
    SlowClient,

    /// No pong from the client within the read deadline
    #[error("No pong from client within {0:?}")]
    ReadTimeout(Duration),

    /// Client closed the connection or the connection failed
    #[error("Client disconnected")]
    ClientGone,

    /// Gateway is shutting down
    #[error("Gateway shutting down")]
    Shutdown,
}

/// How a session ended without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Follow mode: upstream ended and every queued line was delivered
    Drained {
        /// Text messages sent
        lines: usize,
    },
    /// Tail mode: the requested tail was delivered
    TailSent {
        /// Text messages sent
        lines: usize,
    },
}

/// Message written to the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// One log line
    Text(String),
    /// Keepalive ping without payload
    Ping,
    /// Normal closure
    Close,
}

/// Event read from the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Keepalive answer
    Pong,
    /// Client started the closing handshake
    Close,
    /// Any other frame; ignored
    Other,
}

/// Session-wide termination handle
///
/// Cloned into every task of a session. The first recorded reason wins.
#[derive(Clone, Debug)]
pub struct SessionControl {
    token: CancellationToken,
    reason: Arc<Mutex<Option<SessionError>>>,
}

impl SessionControl {
    /// Standalone control, not tied to any server shutdown
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Control that also ends when `shutdown` is cancelled
    #[must_use]
    pub fn child_of(shutdown: &CancellationToken) -> Self {
        Self::with_token(shutdown.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// End the session with `reason`
    ///
    /// Returns `true` if this call decided the reason.
    pub fn terminate(&self, reason: SessionError) -> bool {
        let decided = {
            let mut slot = self.reason.lock();
            if slot.is_none() && !self.token.is_cancelled() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        decided
    }

    /// Whether the session has been terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token for work that must stop when the session ends
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait until the session is terminated
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Recorded reason, if any
    #[must_use]
    pub fn reason(&self) -> Option<SessionError> {
        self.reason.lock().clone()
    }

    /// Reason to report for a terminated session
    ///
    /// A session cancelled through its parent token has no recorded reason
    /// and reports [`SessionError::Shutdown`].
    #[must_use]
    pub fn termination(&self) -> SessionError {
        self.reason().unwrap_or(SessionError::Shutdown)
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry view of a running session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Session ID
    pub id: SessionId,
    /// Log target
    pub target: String,
    /// Follow or tail mode
    pub follow: bool,
    /// When the session started
    pub opened_at: Instant,
    control: SessionControl,
    phase: Arc<Mutex<SessionPhase>>,
}

impl SessionHandle {
    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// Force the session to end
    pub fn terminate(&self, reason: SessionError) -> bool {
        self.control.terminate(reason)
    }
}

/// One client streaming session
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    options: StreamOptions,
    config: StreamConfig,
    control: SessionControl,
    phase: Arc<Mutex<SessionPhase>>,
    opened_at: Instant,
}

impl Session {
    /// Create a session in the `Upgrading` phase
    #[must_use]
    pub fn new(options: StreamOptions, config: StreamConfig) -> Self {
        Self {
            id: SessionId::new(),
            options,
            config,
            control: SessionControl::new(),
            phase: Arc::new(Mutex::new(SessionPhase::Upgrading)),
            opened_at: Instant::now(),
        }
    }

    /// Tie the session to a server-wide shutdown token
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.control = SessionControl::child_of(shutdown);
        self
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Request options
    #[must_use]
    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Termination handle
    #[must_use]
    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// Registry view of this session
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            target: self.options.id.clone(),
            follow: self.options.follow,
            opened_at: self.opened_at,
            control: self.control.clone(),
            phase: Arc::clone(&self.phase),
        }
    }

    pub(crate) fn set_phase(&self, next: SessionPhase) {
        let mut phase = self.phase.lock();
        if *phase != next {
            tracing::debug!(from = %*phase, to = %next, "Session phase change");
            *phase = next;
        }
    }

    /// Serve the session until it ends
    ///
    /// Consumes the upstream stream; it is released before this returns.
    ///
    /// # Errors
    ///
    /// Returns the [`SessionError`] that tore the session down.
    pub async fn run<S, R, E>(
        &self,
        stream: LogStream,
        sink: S,
        inbound: R,
    ) -> Result<SessionEnd, SessionError>
    where
        S: Sink<Outbound> + Unpin + Send + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = Result<Inbound, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let lines = stream.lines(self.config.max_line_bytes);
        self.set_phase(SessionPhase::Streaming);

        let result = if self.options.follow {
            follow::run(self, lines, sink, inbound).await
        } else {
            drop(inbound);
            tail::run(self, lines, sink).await
        };

        self.set_phase(SessionPhase::Closed);
        let elapsed = self.opened_at.elapsed();
        match &result {
            Ok(end) => tracing::info!(outcome = ?end, ?elapsed, "Session ended"),
            Err(e) => tracing::info!(error = %e, ?elapsed, "Session terminated"),
        }
        result
    }
}

/// Send one message, bounded by `deadline` and the session token
pub(crate) async fn send_with_deadline<S>(
    sink: &mut S,
    message: Outbound,
    deadline: Duration,
    control: &SessionControl,
) -> Result<(), SessionError>
where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    tokio::select! {
        biased;
        () = control.cancelled() => Err(control.termination()),
        sent = tokio::time::timeout(deadline, sink.send(message)) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Write(e.to_string())),
            Err(_) => Err(SessionError::WriteTimeout(deadline)),
        },
    }
}

/// Send the normal-closure frame and flush the sink
pub(crate) async fn close_gracefully<S>(
    sink: &mut S,
    deadline: Duration,
    control: &SessionControl,
) -> Result<(), SessionError>
where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    send_with_deadline(sink, Outbound::Close, deadline, control).await?;
    if let Ok(Err(e)) = tokio::time::timeout(deadline, sink.close()).await {
        tracing::debug!(error = %e, "Sink close after normal closure failed");
    }
    Ok(())
}
