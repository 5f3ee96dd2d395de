//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use logstream_core::{
    validate_target, LogSource, LogStream, SourceError, StreamOptions,
};
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

const PIPE_SIZE: usize = 1 << 16;

/// Open an in-memory log stream preloaded with `script`
///
/// When `stall` is set the write half is returned so the stream stays open
/// after the script is consumed.
pub async fn scripted_stream(script: &[u8], stall: bool) -> (LogStream, Option<DuplexStream>) {
    let (mut tx, rx) = tokio::io::duplex(PIPE_SIZE);
    tx.write_all(script).await.unwrap();
    let held = if stall { Some(tx) } else { None };
    (LogStream::from_reader(rx), held)
}

/// Log source serving the same script to every subscriber
pub struct ScriptedSource {
    script: Vec<u8>,
    stall: bool,
    fail_status: Option<u16>,
    healthy: bool,
    subscribes: AtomicUsize,
    held: Mutex<Vec<DuplexStream>>,
}

impl ScriptedSource {
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
            stall: false,
            fail_status: None,
            healthy: true,
            subscribes: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Keep every stream open after its script
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Reject every subscription with `status`
    pub fn failing(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    async fn subscribe(
        &self,
        target: &str,
        _options: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<LogStream, SourceError> {
        validate_target(target)?;
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.fail_status {
            return Err(SourceError::Status {
                status,
                message: "no such container".to_string(),
            });
        }

        let (mut tx, rx) = tokio::io::duplex(PIPE_SIZE);
        tx.write_all(&self.script)
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;
        if self.stall {
            self.held.lock().push(tx);
        }
        Ok(LogStream::new(rx, cancel))
    }
}
