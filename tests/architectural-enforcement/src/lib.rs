//! Architectural Enforcement Integration Tests
//!
//! Source scanning shared by the policy tests in `tests/`:
//! - No sleeping in production code except reconnect backoff
//! - No blocking I/O inside async functions
//!
//! Scanning is line based. Everything from the first `#[cfg(test)]` of a file
//! onwards is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["ereader/core/src", "ereader/cli/src"];

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under the production source trees
#[must_use]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files
}

/// Lines of a file up to its test module
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .collect()
}

/// Read a file and keep only its production lines
#[must_use]
pub fn read_production_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => production_lines(&content)
            .into_iter()
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Kind of function declared on a line, if any
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
}

/// Classify a function declaration line
#[must_use]
pub fn fn_declaration(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if rest.starts_with("fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// Kind of the nearest function declared at or above `idx`
#[must_use]
pub fn enclosing_fn<S: AsRef<str>>(lines: &[S], idx: usize) -> Option<FnKind> {
    (0..=idx.min(lines.len().saturating_sub(1)))
        .rev()
        .find_map(|i| fn_declaration(lines[i].as_ref()))
}

/// Whether `idx` sits in reconnect backoff code
///
/// Requires both a retry/reconnect mention and a delay computation within
/// the preceding fifteen lines.
#[must_use]
pub fn is_backoff_context<S: AsRef<str>>(lines: &[S], idx: usize) -> bool {
    let range = idx.saturating_sub(15)..(idx + 1).min(lines.len());

    let mut has_delay = false;
    let mut has_retry = false;
    for line in &lines[range] {
        let line = line.as_ref().to_lowercase();
        if line.contains("delay") || line.contains("backoff") {
            has_delay = true;
        }
        if line.contains("retry") || line.contains("retries") || line.contains("reconnect") {
            has_retry = true;
        }
    }
    has_delay && has_retry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn run() {}\n\n#[cfg(test)]\nmod tests {\n    fn helper() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn run() {}", ""]);
    }

    #[test]
    fn test_fn_declaration() {
        assert_eq!(fn_declaration("    pub async fn start(&mut self)"), Some(FnKind::Async));
        assert_eq!(fn_declaration("pub(crate) fn helper()"), Some(FnKind::Sync));
        assert_eq!(fn_declaration("async fn main() -> Result<()> {"), Some(FnKind::Async));
        assert_eq!(fn_declaration("let f = |x| x;"), None);
    }

    #[test]
    fn test_enclosing_fn() {
        let code = [
            "pub fn load() {",
            "    std::fs::read_to_string(path)",
            "}",
            "async fn pump() {",
            "    std::fs::read(path)",
            "}",
        ];
        assert_eq!(enclosing_fn(&code, 1), Some(FnKind::Sync));
        assert_eq!(enclosing_fn(&code, 4), Some(FnKind::Async));
    }

    #[test]
    fn test_backoff_detection() {
        let code = [
            "async fn wait_for_retry(&mut self) -> bool {",
            "    self.retries += 1;",
            "    let delay = self.interval.saturating_mul(self.retries);",
            "    let sleep = tokio::time::sleep(delay);",
        ];
        assert!(is_backoff_context(&code, 3));

        let polling = ["loop {", "    tokio::time::sleep(Duration::from_millis(10)).await;"];
        assert!(!is_backoff_context(&polling, 1));
    }

    #[test]
    fn test_production_sources_found() {
        let sources = production_sources();
        assert!(sources.iter().any(|p| p.ends_with("ereader/core/src/lib.rs")));
        assert!(sources.iter().any(|p| p.ends_with("ereader/cli/src/main.rs")));
    }
}
