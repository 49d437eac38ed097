//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in `ereader/core` and `ereader/cli` use
//! `tokio::fs`, `tokio::net`, `tokio::io` and async `reqwest`, never their
//! blocking counterparts. Plain functions (config loading before a runtime
//! is needed) may block.

use architectural_enforcement::{
    code_part, enclosing_fn, production_sources, read_production_lines, FnKind,
};

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for path in production_sources() {
        let lines = read_production_lines(&path);
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);

            // Blocking HTTP is never acceptable, async context or not
            if code.contains("reqwest::blocking") {
                violations.push(format!(
                    "{}:{} - Blocking HTTP client: {}",
                    path.display(),
                    idx + 1,
                    line.trim()
                ));
                continue;
            }

            if enclosing_fn(&lines, idx) != Some(FnKind::Async) {
                continue;
            }
            for (pattern, label) in BLOCKING_PATTERNS {
                if code.contains(pattern) {
                    violations.push(format!(
                        "{}:{} - {label}: {}",
                        path.display(),
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net, tokio::io::stdout and async reqwest instead.");

        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_document_loading_is_async() {
    let path = architectural_enforcement::workspace_root().join("ereader/core/src/document.rs");
    let lines = read_production_lines(&path);

    assert!(
        lines.iter().any(|l| l.contains("tokio::fs::read")),
        "Document::load should read through tokio::fs"
    );
}
