//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in `tests/`:
//! - No blocking I/O inside async production code
//! - No sleep calls in production code (timeouts and intervals only)
//!
//! Scanning is line based. Everything after the first `#[cfg(test)]`
//! attribute in a file counts as test code and is skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["logstream/core/src", "logstream/daemon/src"];

/// A rule broken at a specific source line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Short rule description
    pub kind: &'static str,
    /// Offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

/// Which scan to run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Blocking std I/O or blocking HTTP in async code
    BlockingIo,
    /// Any sleep call
    Sleep,
}

/// Workspace root, derived from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Scan every production directory for `rule`
///
/// # Panics
///
/// Panics if a production directory is missing, so a moved crate cannot
/// make the scan pass vacuously.
#[must_use]
pub fn scan_production(rule: Rule) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "production directory missing: {}", path.display());
        violations.extend(scan_directory(&path, rule));
    }
    violations
}

/// Scan all `.rs` files below `dir`
#[must_use]
pub fn scan_directory(dir: &Path, rule: Rule) -> Vec<Violation> {
    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        if let Ok(content) = fs::read_to_string(entry.path()) {
            violations.extend(scan_source(entry.path(), &content, rule));
        }
    }
    violations
}

/// Scan one file's contents
#[must_use]
pub fn scan_source(path: &Path, content: &str, rule: Rule) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let production_end = lines
        .iter()
        .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
        .unwrap_or(lines.len());

    let mut violations = Vec::new();
    for (idx, line) in lines[..production_end].iter().enumerate() {
        let code = line.split("//").next().unwrap_or(line);
        if code.trim().is_empty() {
            continue;
        }

        let kind = match rule {
            Rule::BlockingIo => blocking_io_kind(code, enclosing_fn(&lines, idx)),
            Rule::Sleep => sleep_kind(code),
        };
        if let Some(kind) = kind {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                kind,
                text: line.trim().to_string(),
            });
        }
    }
    violations
}

/// Kind of function enclosing a line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnContext {
    /// Inside an `async fn` or async block
    Async,
    /// Inside a plain `fn`
    Sync,
    /// Module level (imports, items)
    Module,
}

fn blocking_io_kind(code: &str, context: FnContext) -> Option<&'static str> {
    const BLOCKING_NET: &[&str] = &[
        "std::net::TcpStream",
        "std::net::TcpListener",
        "std::net::UdpSocket",
    ];

    if BLOCKING_NET.iter().any(|pattern| code.contains(pattern)) {
        return Some("Blocking network I/O");
    }
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("std::process::Command") {
        return Some("Blocking process I/O");
    }
    if context == FnContext::Sync {
        // Plain functions may block; they run before or outside the reactor
        return None;
    }
    if code.contains("std::fs::") || code.trim_start().starts_with("use std::fs") {
        return Some("Blocking file I/O");
    }
    if context == FnContext::Async
        && (code.contains("std::io::stdin()") || code.contains("std::io::stdout()"))
    {
        return Some("Blocking stdin/stdout in async");
    }
    None
}

fn sleep_kind(code: &str) -> Option<&'static str> {
    if code.contains("std::thread::sleep") || code.contains("thread::sleep(") {
        return Some("Thread sleep");
    }
    if code.contains("time::sleep(") || code.contains("sleep_until(") {
        return Some("Timer sleep");
    }
    None
}

/// Classify a trimmed line as a function signature
///
/// Returns `Some(true)` for async functions, `Some(false)` for plain ones.
fn fn_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let is_async = rest.starts_with("async ");
    if is_async {
        rest = &rest["async ".len()..];
    }
    if rest.starts_with("fn ") {
        Some(is_async)
    } else {
        None
    }
}

/// Find the function enclosing `current_idx` by scanning backwards
#[must_use]
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> FnContext {
    for i in (0..=current_idx).rev() {
        let line = lines[i];

        if i < current_idx && line.contains("async move {") {
            return FnContext::Async;
        }
        if let Some(is_async) = fn_signature(line) {
            return if is_async {
                FnContext::Async
            } else {
                FnContext::Sync
            };
        }

        // Stop at item boundaries
        let trimmed = line.trim_start();
        if i < current_idx
            && (trimmed.starts_with("mod ")
                || trimmed.starts_with("impl ")
                || trimmed.starts_with("impl<")
                || trimmed.starts_with("pub mod "))
        {
            return FnContext::Module;
        }
    }
    FnContext::Module
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str, rule: Rule) -> Vec<Violation> {
        scan_source(Path::new("sample.rs"), code, rule)
    }

    #[test]
    fn test_blocking_fs_in_async_fn() {
        let code = "pub async fn load() {\n    let s = std::fs::read_to_string(\"x\");\n}\n";
        let violations = scan(code, Rule::BlockingIo);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].kind, "Blocking file I/O");
    }

    #[test]
    fn test_fs_in_plain_fn_is_allowed() {
        let code = "pub fn load() {\n    let s = std::fs::read_to_string(\"x\");\n}\n";
        assert!(scan(code, Rule::BlockingIo).is_empty());
    }

    #[test]
    fn test_socket_addr_is_not_blocking() {
        let code = "use std::net::SocketAddr;\n\nfn bind(addr: SocketAddr) {}\n";
        assert!(scan(code, Rule::BlockingIo).is_empty());
    }

    #[test]
    fn test_blocking_listener_flagged_anywhere() {
        let code = "fn bind() {\n    let l = std::net::TcpListener::bind(\"0:0\");\n}\n";
        let violations = scan(code, Rule::BlockingIo);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, "Blocking network I/O");
    }

    #[test]
    fn test_test_module_is_skipped() {
        let code = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    async fn t() { std::fs::read(\"x\"); }\n}\n";
        assert!(scan(code, Rule::BlockingIo).is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let code = "async fn a() {\n    // std::fs::read is not allowed here\n}\n";
        assert!(scan(code, Rule::BlockingIo).is_empty());
    }

    #[test]
    fn test_async_block_inside_plain_fn() {
        let lines = vec![
            "fn spawn() {",
            "    tokio::spawn(async move {",
            "        std::fs::read(\"x\");",
            "    });",
            "}",
        ];
        assert_eq!(enclosing_fn(&lines, 2), FnContext::Async);
        assert_eq!(enclosing_fn(&lines, 1), FnContext::Sync);
    }

    #[test]
    fn test_fn_signature() {
        assert_eq!(fn_signature("pub async fn run(&self) {"), Some(true));
        assert_eq!(fn_signature("    pub(crate) fn new() -> Self {"), Some(false));
        assert_eq!(fn_signature("fn main() {"), Some(false));
        assert_eq!(fn_signature("let f = fn_ptr;"), None);
    }

    #[test]
    fn test_sleep_detection() {
        let code = "async fn poll() {\n    tokio::time::sleep(d).await;\n}\n";
        assert_eq!(scan(code, Rule::Sleep).len(), 1);

        let code = "async fn poll() {\n    tokio::time::timeout(d, f).await;\n}\n";
        assert!(scan(code, Rule::Sleep).is_empty());
    }
}
