//! Sleep Prohibition Test
//!
//! Production code waits on events, deadlines and intervals; it never
//! sleeps. Keepalive uses `tokio::time::interval`, idle detection and the
//! read deadline use `timeout` / `timeout_at`.
//!
//! Test modules are exempt: they sleep under paused time to advance clocks.

use architectural_enforcement::{scan_production, Rule};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(Rule::Sleep);

    if !violations.is_empty() {
        let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
        panic!(
            "\nSleep calls in production code ({} violations):\n\n{}\n\n\
             Wait on a channel, a CancellationToken, or a tokio::time deadline.\n",
            violations.len(),
            report.join("\n")
        );
    }
}
