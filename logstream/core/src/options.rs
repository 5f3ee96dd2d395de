//! Stream Options
//!
//! Per-session request options, parsed once from the upgrade request's query
//! string and never mutated afterwards.

use std::fmt;

use serde::Deserialize;

/// Historical line count used when `tail` is missing or unusable
pub const DEFAULT_TAIL: usize = 20;

/// Requested number of historical lines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tail {
    /// Every available line
    All,
    /// At most this many of the most recent lines
    Lines(usize),
}

impl Tail {
    /// Parse a `tail` query value
    ///
    /// `all` selects every line; a positive integer selects that many.
    /// Anything else falls back to `default`.
    #[must_use]
    pub fn parse(raw: &str, default: usize) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("all") {
            return Self::All;
        }
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => Self::Lines(n),
            _ => Self::Lines(default),
        }
    }

    /// Index of the first line to keep out of `len` collected lines
    #[must_use]
    pub fn start_index(self, len: usize) -> usize {
        match self {
            Self::All => 0,
            Self::Lines(n) => len.saturating_sub(n),
        }
    }
}

impl Default for Tail {
    fn default() -> Self {
        Self::Lines(DEFAULT_TAIL)
    }
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Lines(n) => write!(f, "{n}"),
        }
    }
}

/// Raw query parameters of a log streaming request
///
/// Every field is required and arrives as a string. A request missing any of
/// them is rejected before the upgrade.
#[derive(Clone, Debug, Deserialize)]
pub struct LogsQuery {
    /// Historical line count (`all` or an integer)
    pub tail: String,
    /// Opaque cursor forwarded to the Log Source
    pub since: String,
    /// Include standard output
    pub stdout: String,
    /// Include standard error
    pub stderr: String,
    /// Continuous streaming instead of one-shot retrieval
    pub follow: String,
    /// Ask the source to prefix timestamps
    pub timestamps: String,
    /// Ask the source for extra details
    pub details: String,
}

/// Immutable options of one streaming session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Target log-source identifier
    pub id: String,
    /// Requested historical line count
    pub tail: Tail,
    /// Opaque cursor/timestamp forwarded verbatim
    pub since: String,
    /// Continuous (true) vs one-shot (false)
    pub follow: bool,
    /// Include standard output
    pub stdout: bool,
    /// Include standard error
    pub stderr: bool,
    /// Prefix timestamps
    pub timestamps: bool,
    /// Include details
    pub details: bool,
}

impl StreamOptions {
    /// Create options for `id` with everything else at its default
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tail: Tail::default(),
            since: String::new(),
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            details: false,
        }
    }

    /// Build options from the target id and raw query
    ///
    /// Boolean values that do not parse count as `false`.
    #[must_use]
    pub fn from_query(id: impl Into<String>, query: &LogsQuery, default_tail: usize) -> Self {
        Self {
            id: id.into(),
            tail: Tail::parse(&query.tail, default_tail),
            since: query.since.clone(),
            follow: parse_bool(&query.follow),
            stdout: parse_bool(&query.stdout),
            stderr: parse_bool(&query.stderr),
            timestamps: parse_bool(&query.timestamps),
            details: parse_bool(&query.details),
        }
    }

    /// Set follow mode
    #[must_use]
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Set the tail
    #[must_use]
    pub fn with_tail(mut self, tail: Tail) -> Self {
        self.tail = tail;
        self
    }

    /// Set the since cursor
    #[must_use]
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = since.into();
        self
    }
}

/// Coerce a query flag to a bool
///
/// Accepts `1`, `t`, `T`, `TRUE`, `true`, `True` and their false
/// counterparts. Anything else is `false`.
#[must_use]
pub fn parse_bool(raw: &str) -> bool {
    matches!(raw, "1" | "t" | "T" | "TRUE" | "true" | "True")
}
