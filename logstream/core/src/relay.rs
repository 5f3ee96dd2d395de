//! Bounded Relay Queue
//!
//! Single-producer, single-consumer FIFO between a session's reader and its
//! writer. Enqueue succeeds immediately, succeeds after one bounded wait, or
//! reports the queue as full so the caller can evict the client.
//!
//! Either side may close the queue. Closing goes through a one-shot latch
//! shared by both halves, so the reader hitting EOF and the backpressure path
//! racing to close it is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Enqueue failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// No capacity freed up within the grace window
    #[error("Relay queue full after {0:?}")]
    Full(Duration),

    /// Queue was closed by either side
    #[error("Relay queue closed")]
    Closed,
}

/// How an enqueue succeeded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// Capacity was available
    Immediate,
    /// Capacity was freed during the grace window
    AfterRetry,
}

/// Create a relay queue with room for `capacity` chunks
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn relay_queue(capacity: usize) -> (RelayProducer, RelayConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));
    (
        RelayProducer {
            tx: Mutex::new(Some(tx)),
            closed: Arc::clone(&closed),
        },
        RelayConsumer { rx, closed },
    )
}

/// Reader side of the relay queue
#[derive(Debug)]
pub struct RelayProducer {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl RelayProducer {
    /// Enqueue one chunk, waiting at most `grace` for space
    ///
    /// # Errors
    ///
    /// [`RelayError::Full`] if the queue stayed full for the whole grace
    /// window, [`RelayError::Closed`] if either side closed it.
    pub async fn enqueue(&self, chunk: Vec<u8>, grace: Duration) -> Result<Enqueued, RelayError> {
        let tx = match self.tx.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(RelayError::Closed),
        };

        let chunk = match tx.try_send(chunk) {
            Ok(()) => return Ok(Enqueued::Immediate),
            Err(TrySendError::Closed(_)) => return Err(RelayError::Closed),
            Err(TrySendError::Full(chunk)) => chunk,
        };

        match tokio::time::timeout(grace, tx.send(chunk)).await {
            Ok(Ok(())) => Ok(Enqueued::AfterRetry),
            Ok(Err(_)) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::Full(grace)),
        }
    }

    /// Close the queue; already queued chunks stay readable
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.tx.lock().take();
        first
    }

    /// Whether either side has closed the queue
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Writer side of the relay queue
#[derive(Debug)]
pub struct RelayConsumer {
    rx: mpsc::Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl RelayConsumer {
    /// Next chunk in FIFO order
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Stop accepting chunks; queued chunks can still be received
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&mut self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.rx.close();
        first
    }

    /// Whether either side has closed the queue
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
