//! Tail Collector
//!
//! One-shot mode. Lines are gathered until the source reports end-of-stream
//! or goes quiet for the idle window, then only the last `tail` lines are
//! sent and the session closes normally. The relay queue and keepalive are
//! never involved.

use std::fmt;
use std::time::Duration;

use futures::Sink;
use tokio::io::AsyncBufRead;

use super::{
    close_gracefully, send_with_deadline, Outbound, Session, SessionControl, SessionEnd,
    SessionError, SessionPhase,
};
use crate::demux::demux_text;
use crate::source::{LineReader, LogStream};

/// Run a tail-mode session
pub(crate) async fn run<S>(
    session: &Session,
    mut lines: LineReader<tokio::io::BufReader<LogStream>>,
    mut sink: S,
) -> Result<SessionEnd, SessionError>
where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    let config = &session.config;
    let control = &session.control;

    let collected = collect_lines(
        &mut lines,
        control,
        config.tail_first_line_wait,
        config.tail_idle,
    )
    .await;
    lines.close();
    let collected = collected?;

    session.set_phase(SessionPhase::Draining);
    let start = session.options.tail.start_index(collected.len());
    tracing::debug!(
        collected = collected.len(),
        tail = %session.options.tail,
        "Tail collection finished"
    );

    let mut sent = 0;
    for line in collected.into_iter().skip(start) {
        send_with_deadline(&mut sink, Outbound::Text(line), config.write_timeout, control).await?;
        sent += 1;
    }
    close_gracefully(&mut sink, config.write_timeout, control).await?;

    Ok(SessionEnd::TailSent { lines: sent })
}

/// Gather demultiplexed lines until EOF, a read error or an idle window
///
/// `first_wait` bounds the wait for the first line; every later line must
/// arrive within `idle` of the previous one.
pub(crate) async fn collect_lines<R>(
    lines: &mut LineReader<R>,
    control: &SessionControl,
    first_wait: Duration,
    idle: Duration,
) -> Result<Vec<String>, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut collected = Vec::new();
    let mut wait = first_wait;

    loop {
        let next = tokio::select! {
            biased;
            () = control.cancelled() => return Err(control.termination()),
            next = tokio::time::timeout(wait, lines.next_line()) => next,
        };

        match next {
            Ok(Ok(Some(line))) => {
                collected.extend(demux_text(&line));
                wait = idle;
            }
            Ok(Ok(None)) => {
                tracing::debug!("Log source reached end of stream");
                break;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Log source read failed during tail collection");
                break;
            }
            Err(_) => {
                tracing::debug!(?wait, "Log source idle, finishing tail");
                break;
            }
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::BufReader;

    use crate::demux::{encode_frame, StreamType};

    const FIRST: Duration = Duration::from_secs(2);
    const IDLE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_collect_until_eof() {
        let mut payload = encode_frame(StreamType::Stdout, b"one\n");
        payload.extend(encode_frame(StreamType::Stderr, b"two\n"));
        payload.extend_from_slice(b"three\n");
        let mock = tokio_test::io::Builder::new().read(&payload).build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);

        let collected = collect_lines(&mut lines, &SessionControl::new(), FIRST, IDLE)
            .await
            .unwrap();
        assert_eq!(collected, vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_stops_when_source_goes_idle() {
        let mock = tokio_test::io::Builder::new()
            .read(b"one\n")
            .wait(Duration::from_millis(50))
            .read(b"two\n")
            .wait(Duration::from_secs(3600))
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);

        let started = tokio::time::Instant::now();
        let collected = collect_lines(&mut lines, &SessionControl::new(), FIRST, IDLE)
            .await
            .unwrap();
        assert_eq!(collected, vec!["one", "two"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_line_gets_longer_wait() {
        let mock = tokio_test::io::Builder::new()
            .wait(Duration::from_millis(500))
            .read(b"late but welcome\n")
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);

        let collected = collect_lines(&mut lines, &SessionControl::new(), FIRST, IDLE)
            .await
            .unwrap();
        assert_eq!(collected, vec!["late but welcome"]);
    }

    #[tokio::test]
    async fn test_read_error_keeps_collected_lines() {
        let mock = tokio_test::io::Builder::new()
            .read(b"kept\n")
            .read_error(std::io::Error::other("boom"))
            .build();
        let mut lines = LineReader::new(BufReader::new(mock), 1024);

        let collected = collect_lines(&mut lines, &SessionControl::new(), FIRST, IDLE)
            .await
            .unwrap();
        assert_eq!(collected, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_collect_aborts_on_termination() {
        let control = SessionControl::new();
        control.terminate(SessionError::Shutdown);
        let mut lines = LineReader::new(BufReader::new(&b"one\n"[..]), 1024);

        let err = collect_lines(&mut lines, &control, FIRST, IDLE)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Shutdown);
    }
}
