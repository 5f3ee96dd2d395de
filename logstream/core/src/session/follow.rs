//! Streaming Pipeline
//!
//! Follow mode runs three cooperating parts per session:
//!
//! - **Reader** (inline in [`run`]): pulls lines from the Log Source and
//!   enqueues them on the relay queue, evicting the client if the queue stays
//!   full past the grace window.
//! - **Writer** ([`write_loop`]): drains the queue into text messages and
//!   sends keepalive pings.
//! - **Disconnect watcher** ([`watch_client`]): drains client frames to see
//!   pongs and closure.
//!
//! On upstream EOF the queue is closed and the writer flushes what is left,
//! then sends a normal-closure frame.

use std::fmt;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::{
    close_gracefully, send_with_deadline, Inbound, Outbound, Session, SessionControl, SessionEnd,
    SessionError, SessionPhase,
};
use crate::config::StreamConfig;
use crate::demux::demux_text;
use crate::relay::{relay_queue, Enqueued, RelayConsumer, RelayError, RelayProducer};
use crate::source::{LineReader, LogStream};

/// How the reader loop stopped
#[derive(Debug)]
enum ReadOutcome {
    /// Upstream ended normally
    Eof,
    /// Upstream read failed
    Failed(SessionError),
    /// Queue stayed full past the grace window
    SlowClient,
    /// Queue was closed by the writer
    WriterGone,
    /// Session token fired
    Terminated,
}

/// Run a follow-mode session
pub(crate) async fn run<S, R, E>(
    session: &Session,
    mut lines: LineReader<BufReader<LogStream>>,
    sink: S,
    inbound: R,
) -> Result<SessionEnd, SessionError>
where
    S: Sink<Outbound> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
    R: Stream<Item = Result<Inbound, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let config = &session.config;
    let control = &session.control;
    let (producer, consumer) = relay_queue(config.relay_capacity);

    let watcher = tokio::spawn(
        watch_client(inbound, control.clone(), config.read_timeout).in_current_span(),
    );
    let mut writer = tokio::spawn(
        write_loop(consumer, sink, control.clone(), config.clone()).in_current_span(),
    );

    let outcome = read_loop(&mut lines, &producer, control, config).await;
    lines.close();

    let result = match outcome {
        ReadOutcome::Eof => {
            tracing::info!("Log source reached end of stream");
            producer.close();
            session.set_phase(SessionPhase::Draining);
            join_writer(writer, control).await
        }
        ReadOutcome::SlowClient => {
            tracing::warn!(
                capacity = config.relay_capacity,
                grace = ?config.grace_window,
                "Client too slow, evicting"
            );
            producer.close();
            session.set_phase(SessionPhase::Draining);
            if tokio::time::timeout(config.drain_wait, &mut writer).await.is_err() {
                tracing::warn!(drain_wait = ?config.drain_wait, "Writer did not drain in time");
            }
            control.terminate(SessionError::SlowClient);
            writer.abort();
            Err(control.termination())
        }
        ReadOutcome::Failed(err) => {
            tracing::warn!(error = %err, "Log source read failed");
            control.terminate(err);
            writer.abort();
            Err(control.termination())
        }
        ReadOutcome::WriterGone | ReadOutcome::Terminated => {
            producer.close();
            join_writer(writer, control).await
        }
    };

    watcher.abort();
    result
}

/// Reader task body: source lines into the relay queue
async fn read_loop(
    lines: &mut LineReader<BufReader<LogStream>>,
    producer: &RelayProducer,
    control: &SessionControl,
    config: &StreamConfig,
) -> ReadOutcome {
    loop {
        let next = tokio::select! {
            biased;
            () = control.cancelled() => return ReadOutcome::Terminated,
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return ReadOutcome::Eof,
            Err(e) => return ReadOutcome::Failed(SessionError::SourceRead(e.to_string())),
        };
        if line.is_empty() {
            continue;
        }

        let enqueued = tokio::select! {
            biased;
            () = control.cancelled() => return ReadOutcome::Terminated,
            enqueued = producer.enqueue(line, config.grace_window) => enqueued,
        };
        match enqueued {
            Ok(Enqueued::Immediate) => {}
            Ok(Enqueued::AfterRetry) => tracing::trace!("Relay queue had to wait for space"),
            Err(RelayError::Full(_)) => return ReadOutcome::SlowClient,
            Err(RelayError::Closed) => return ReadOutcome::WriterGone,
        }
    }
}

async fn join_writer(
    writer: JoinHandle<Result<usize, SessionError>>,
    control: &SessionControl,
) -> Result<SessionEnd, SessionError> {
    match writer.await {
        Ok(Ok(lines)) => Ok(SessionEnd::Drained { lines }),
        Ok(Err(e)) => Err(e),
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Writer task panicked");
            control.terminate(SessionError::Write(e.to_string()));
            Err(control.termination())
        }
        Err(_) => Err(control.termination()),
    }
}

/// Writer / keepalive task
///
/// Returns the number of text messages sent once the queue is drained and
/// the normal-closure frame is out.
pub(crate) async fn write_loop<S>(
    mut consumer: RelayConsumer,
    mut sink: S,
    control: SessionControl,
    config: StreamConfig,
) -> Result<usize, SessionError>
where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    let result = pump(&mut consumer, &mut sink, &control, &config).await;
    consumer.close();
    if let Err(ref e) = result {
        if control.terminate(e.clone()) {
            tracing::warn!(error = %e, "Write to client failed");
        }
    }
    result
}

async fn pump<S>(
    consumer: &mut RelayConsumer,
    sink: &mut S,
    control: &SessionControl,
    config: &StreamConfig,
) -> Result<usize, SessionError>
where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0;

    loop {
        tokio::select! {
            biased;
            () = control.cancelled() => return Err(control.termination()),
            _ = keepalive.tick() => {
                tracing::trace!("Sending keepalive ping");
                send_with_deadline(sink, Outbound::Ping, config.write_timeout, control).await?;
            }
            chunk = consumer.recv() => match chunk {
                Some(chunk) => {
                    // A single chunk may carry several framed lines
                    for line in demux_text(&chunk) {
                        let message = Outbound::Text(line);
                        send_with_deadline(sink, message, config.write_timeout, control).await?;
                        sent += 1;
                    }
                }
                None => {
                    close_gracefully(sink, config.write_timeout, control).await?;
                    return Ok(sent);
                }
            },
        }
    }
}

/// Disconnect watcher task
///
/// The read deadline is pushed out only when a pong arrives.
pub(crate) async fn watch_client<R, E>(
    mut inbound: R,
    control: SessionControl,
    read_timeout: Duration,
) where
    R: Stream<Item = Result<Inbound, E>> + Unpin,
    E: fmt::Display,
{
    let mut deadline = Instant::now() + read_timeout;

    loop {
        let next = tokio::select! {
            biased;
            () = control.cancelled() => return,
            next = tokio::time::timeout_at(deadline, inbound.next()) => next,
        };

        match next {
            Ok(Some(Ok(Inbound::Pong))) => {
                tracing::trace!("Pong received");
                deadline = Instant::now() + read_timeout;
            }
            Ok(Some(Ok(Inbound::Other))) => {}
            Ok(Some(Ok(Inbound::Close))) | Ok(None) => {
                tracing::debug!("Client closed the connection");
                control.terminate(SessionError::ClientGone);
                return;
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "Client connection failed");
                control.terminate(SessionError::ClientGone);
                return;
            }
            Err(_) => {
                tracing::debug!(?read_timeout, "Client read deadline passed");
                control.terminate(SessionError::ReadTimeout(read_timeout));
                return;
            }
        }
    }
}
