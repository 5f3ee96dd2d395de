//! Frame Demultiplexer
//!
//! Splits the Log Source byte format into discrete log lines. The source may
//! deliver either raw newline-delimited text or length-prefixed multiplexed
//! frames, and a single chunk can mix both.
//!
//! # Frame Format
//!
//! ```text
//! +--------+-----------+-----------------+--------------------------------+
//! | Type(1)| Reserved  | Length (4)      | Body (Length bytes)            |
//! | 0/1/2  | (3)       | big-endian u32  | one or more '\n' lines         |
//! +--------+-----------+-----------------+--------------------------------+
//! ```
//!
//! # Heuristic
//!
//! - Chunks shorter than the header are raw text.
//! - A chunk is treated as framed when its type byte names a known channel,
//!   or when the declared length fits in the chunk.
//! - Otherwise the first 8 bytes are stripped and the rest is raw text.
//! - Inside framed mode, a header whose length overruns the chunk is
//!   stripped when its type byte is known, and the rest is raw text. Any
//!   remainder without a valid header is raw text as well.
//!
//! Ambiguous input never produces an error. Empty lines are never yielded.

use std::fmt;
use std::slice::Split;

/// Size of a multiplexed frame header
pub const HEADER_SIZE: usize = 8;

/// Channel a multiplexed frame belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    /// Standard input (echoed by some sources)
    Stdin,
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// Unrecognized channel byte
    Other(u8),
}

impl StreamType {
    /// Whether this is one of the three recognized channels
    #[must_use]
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<u8> for StreamType {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Self::Stdin,
            1 => Self::Stdout,
            2 => Self::Stderr,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Other(byte) => write!(f, "other({byte})"),
        }
    }
}

/// Header of a multiplexed frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Channel tag
    pub stream_type: StreamType,
    /// Declared body length
    pub length: u32,
}

impl FrameHeader {
    /// Read a header candidate from the start of `buf`
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Some(Self {
            stream_type: StreamType::from(buf[0]),
            length,
        })
    }

    /// Total size of header plus declared body
    #[must_use]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE.saturating_add(self.length as usize)
    }

    /// Whether the declared frame fits in `available` bytes
    #[must_use]
    pub fn fits(&self, available: usize) -> bool {
        self.frame_len() <= available
    }

    /// Encode the header (used by tests and fake sources)
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let tag = match self.stream_type {
            StreamType::Stdin => 0,
            StreamType::Stdout => 1,
            StreamType::Stderr => 2,
            StreamType::Other(byte) => byte,
        };
        let len = self.length.to_be_bytes();
        [tag, 0, 0, 0, len[0], len[1], len[2], len[3]]
    }
}

/// Encode `body` as multiplexed frames
///
/// Bodies longer than `u32::MAX` bytes are split across consecutive frames
/// of the same stream. An empty body yields a single empty frame.
#[must_use]
pub fn encode_frame(stream_type: StreamType, body: &[u8]) -> Vec<u8> {
    let max_body = usize::try_from(u32::MAX).unwrap_or(usize::MAX);
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    let mut rest = body;
    loop {
        let (chunk, tail) = rest.split_at(rest.len().min(max_body));
        let header = FrameHeader {
            stream_type,
            length: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
        };
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(chunk);
        if tail.is_empty() {
            return frame;
        }
        rest = tail;
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_newline(byte: &u8) -> bool {
    *byte == b'\n'
}

type LineSplit<'a> = Split<'a, u8, fn(&u8) -> bool>;

fn split_lines(buf: &[u8]) -> LineSplit<'_> {
    buf.split(is_newline as fn(&u8) -> bool)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Framed,
    Raw,
}

/// Lazy iterator over the non-empty lines of one payload
///
/// Created by [`demux`]. Borrows the payload; nothing is copied until the
/// caller decides to keep a line.
pub struct DemuxLines<'a> {
    rest: &'a [u8],
    mode: Mode,
    segment: Option<LineSplit<'a>>,
}

impl<'a> DemuxLines<'a> {
    fn new(payload: &'a [u8]) -> Self {
        let (rest, mode) = match FrameHeader::parse(payload) {
            None => (payload, Mode::Raw),
            Some(header) if header.stream_type.is_known() || header.fits(payload.len()) => {
                (payload, Mode::Framed)
            }
            Some(_) => (&payload[HEADER_SIZE..], Mode::Raw),
        };
        Self {
            rest,
            mode,
            segment: None,
        }
    }

    /// Whether the payload was recognized as multiplexed framing
    #[must_use]
    pub fn is_framed(&self) -> bool {
        self.mode == Mode::Framed
    }

    /// Move the next region of the payload into `segment`
    fn advance(&mut self) -> bool {
        if self.rest.is_empty() {
            return false;
        }
        let rest = std::mem::take(&mut self.rest);
        let segment = match (self.mode, FrameHeader::parse(rest)) {
            (Mode::Framed, Some(header)) if header.fits(rest.len()) => {
                let end = header.frame_len();
                self.rest = &rest[end..];
                &rest[HEADER_SIZE..end]
            }
            (Mode::Framed, Some(header)) if header.stream_type.is_known() => {
                // Header overruns the chunk: strip it, keep the body as text
                self.mode = Mode::Raw;
                &rest[HEADER_SIZE..]
            }
            _ => {
                self.mode = Mode::Raw;
                rest
            }
        };
        self.segment = Some(split_lines(segment));
        true
    }
}

impl<'a> Iterator for DemuxLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(segment) = self.segment.as_mut() {
                if let Some(line) = segment.find(|line| !line.is_empty()) {
                    return Some(line);
                }
                self.segment = None;
            }
            if !self.advance() {
                return None;
            }
        }
    }
}

/// Demultiplex a payload into its non-empty lines
///
/// An empty payload yields nothing; callers that care can check
/// `payload.is_empty()` first.
#[must_use]
pub fn demux(payload: &[u8]) -> DemuxLines<'_> {
    DemuxLines::new(payload)
}

/// Demultiplex a payload and decode every line as UTF-8 text
///
/// Invalid sequences are replaced with U+FFFD so the result is always a
/// valid text message.
#[must_use]
pub fn demux_text(payload: &[u8]) -> Vec<String> {
    demux(payload)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}
