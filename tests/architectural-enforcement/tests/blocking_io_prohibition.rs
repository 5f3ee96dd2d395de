//! Blocking I/O Prohibition Test
//!
//! Ensures async production code in the gateway never blocks the runtime.
//!
//! Prohibited:
//! - `std::fs::*` inside async functions or async blocks
//! - `std::net::{TcpStream, TcpListener, UdpSocket}` anywhere
//! - `reqwest::blocking` anywhere
//! - `std::process::Command` anywhere
//! - `std::io::stdin()` / `std::io::stdout()` in async functions
//!
//! Allowed:
//! - `tokio::fs`, `tokio::net` and the async reqwest client
//! - `std::fs` in plain functions (configuration loading at startup)
//! - Anything inside `#[cfg(test)]` modules

use architectural_enforcement::{scan_production, Rule};

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan_production(Rule::BlockingIo);

    if !violations.is_empty() {
        let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
        panic!(
            "\nBlocking I/O in async code ({} violations):\n\n{}\n\n\
             Use tokio::fs / tokio::net, or move the call into a plain fn \
             that runs outside the reactor.\n",
            violations.len(),
            report.join("\n")
        );
    }
}
