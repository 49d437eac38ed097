//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code in `ereader/core` and `ereader/cli` never
//! sleeps to wait for something. Drivers wait on I/O, channels or timeouts.
//! **Exception**: the socket driver's reconnect backoff.

use architectural_enforcement::{
    code_part, is_backoff_context, production_sources, read_production_lines,
};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for path in production_sources() {
        let lines = read_production_lines(&path);
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if is_backoff_context(&lines, idx) {
                continue;
            }
            violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
        }
    }

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAcceptable: reconnect backoff delays. Use timeouts, channels or");
        eprintln!("tokio::time::interval for everything else.");

        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}
