//! Log Source Abstraction
//!
//! The Log Source is the external collaborator that yields raw container log
//! bytes for a target. The gateway only ever calls `subscribe` and later
//! cancels or releases what it got back; connection management belongs to
//! the implementation.
//!
//! # Cancellation
//!
//! Every subscription is tied to a [`CancellationToken`]. Closing or dropping
//! the returned [`LogStream`] cancels it, which unblocks any pending upstream
//! read. Closing is idempotent.
//!
//! # Line reading
//!
//! [`LineReader`] splits the byte stream on `\n`. Each line is handed out as
//! a freshly owned `Vec<u8>`, so a line can cross a channel boundary while
//! the reader keeps filling its own buffer.

pub mod docker;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::options::StreamOptions;

pub use docker::DockerLogSource;

/// Errors raised while subscribing to a Log Source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Target identifier is not acceptable
    #[error("Invalid log target {0:?}")]
    InvalidTarget(String),

    /// Request could not be sent or the connection failed
    #[error("Log source request failed: {0}")]
    Request(String),

    /// Source answered with a non-success status
    #[error("Log source returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Body or reason returned by the source
        message: String,
    },
}

/// Log Source trait
///
/// Implement this trait to stream logs from a different control plane.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Short name for logging (e.g. "docker")
    fn name(&self) -> &str;

    /// Check whether the source is reachable
    async fn health_check(&self) -> bool;

    /// Open a byte stream of log output for `target`
    ///
    /// The stream must end (or fail) once `cancel` fires.
    async fn subscribe(
        &self,
        target: &str,
        options: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<LogStream, SourceError>;
}

/// Validate a target identifier before it is placed in a request path
///
/// # Errors
///
/// Returns [`SourceError::InvalidTarget`] for empty identifiers or ones
/// containing anything besides ASCII alphanumerics, `_`, `.` and `-`.
pub fn validate_target(target: &str) -> Result<(), SourceError> {
    let valid = !target.is_empty()
        && target
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidTarget(target.to_string()))
    }
}

/// Byte stream returned by [`LogSource::subscribe`]
///
/// Reads return end-of-stream once the subscription has been cancelled.
pub struct LogStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    cancel: CancellationToken,
}

impl LogStream {
    /// Wrap a reader whose lifetime is bound to `cancel`
    pub fn new(reader: impl AsyncRead + Send + 'static, cancel: CancellationToken) -> Self {
        Self {
            reader: Box::pin(reader),
            cancel,
        }
    }

    /// Wrap a reader with a fresh cancellation token
    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self::new(reader, CancellationToken::new())
    }

    /// Release the upstream subscription
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription has been released
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that releases this subscription
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Turn the stream into a line reader
    #[must_use]
    pub fn lines(self, max_line_bytes: usize) -> LineReader<BufReader<LogStream>> {
        LineReader::new(BufReader::new(self), max_line_bytes)
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Ok(()));
        }
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Cancel-safe line splitter over a buffered reader
///
/// `next_line` may be raced against timers in `tokio::select!`: a partially
/// read line stays in the reader and is completed by the next call.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a line reader that caps lines at `max_line_bytes`
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Read the next line without its `\n` (or `\r\n`) terminator
    ///
    /// Returns `Ok(None)` at end-of-stream. A final line without a
    /// terminator is still returned. Lines longer than the cap are returned
    /// in cap-sized pieces. Empty lines are returned as empty vectors.
    ///
    /// # Errors
    ///
    /// Propagates non-EOF read errors from the underlying reader.
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let room = self
                .max_line_bytes
                .saturating_sub(self.pending.len())
                .max(1);
            let window = &available[..available.len().min(room)];

            if let Some(pos) = window.iter().position(|b| *b == b'\n') {
                self.pending.extend_from_slice(&window[..pos]);
                self.inner.consume(pos + 1);
                return Ok(Some(self.take_line()));
            }

            let taken = window.len();
            self.pending.extend_from_slice(window);
            self.inner.consume(taken);
            if self.pending.len() >= self.max_line_bytes {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> Vec<u8> {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        std::mem::take(&mut self.pending)
    }

    /// Borrow the underlying reader
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl LineReader<BufReader<LogStream>> {
    /// Release the upstream subscription behind this reader
    pub fn close(&self) {
        self.inner.get_ref().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reader(data: &'static [u8], max: usize) -> LineReader<BufReader<&'static [u8]>> {
        LineReader::new(BufReader::new(data), max)
    }

    #[tokio::test]
    async fn test_splits_lines_and_strips_terminators() {
        let mut lines = reader(b"one\ntwo\r\n\nthree", 1024);
        assert_eq!(lines.next_line().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), Some(Vec::new()));
        assert_eq!(lines.next_line().await.unwrap(), Some(b"three".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_caps_long_lines() {
        let mut lines = reader(b"abcdefgh\n", 3);
        assert_eq!(lines.next_line().await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), Some(b"def".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), Some(b"gh".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lines_spanning_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hel")
            .read(b"lo\nwor")
            .read(b"ld\n")
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);
        assert_eq!(lines.next_line().await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), Some(b"world".to_vec()));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_line_survives_cancelled_read() {
        let mock = tokio_test::io::Builder::new()
            .read(b"par")
            .wait(Duration::from_secs(5))
            .read(b"tial\n")
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);

        let timed_out = tokio::time::timeout(Duration::from_secs(1), lines.next_line()).await;
        assert!(timed_out.is_err());

        assert_eq!(lines.next_line().await.unwrap(), Some(b"partial".to_vec()));
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ok\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);
        assert_eq!(lines.next_line().await.unwrap(), Some(b"ok".to_vec()));
        let err = lines.next_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_closed_stream_reads_as_eof() {
        let stream = LogStream::from_reader(&b"never read\n"[..]);
        let cancel = stream.cancellation();
        let mut lines = stream.lines(1024);
        lines.close();
        assert!(cancel.is_cancelled());
        assert_eq!(lines.next_line().await.unwrap(), None);
        // Closing twice is harmless
        lines.close();
    }

    #[test]
    fn test_drop_releases_subscription() {
        let stream = LogStream::from_reader(&b""[..]);
        let cancel = stream.cancellation();
        assert!(!stream.is_closed());
        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("svc1").is_ok());
        assert!(validate_target("my_stack.web-1").is_ok());
        assert!(validate_target("").is_err());
        assert!(validate_target("../etc").is_err());
        assert!(validate_target("a/b").is_err());
        assert!(validate_target("a?b=c").is_err());
    }
}
