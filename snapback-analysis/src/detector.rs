// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The detector plug-in contract.
//!
//! A detector receives the full file content, an optional path and an
//! optional set of changed lines. It must be pure: no I/O, no clock reads.
//! When `changed_lines` is present the detector restricts its scan to those
//! lines (diff-aware mode).

use snapback_core::DetectorSignal;
use std::collections::BTreeSet;

/// Input handed to a detector by the facade.
#[derive(Debug, Clone, Copy)]
pub struct ScanInput<'a> {
    pub content: &'a str,
    pub path: Option<&'a str>,
    /// 1-based line numbers; when present, only these lines are scanned.
    pub changed_lines: Option<&'a BTreeSet<usize>>,
}

impl<'a> ScanInput<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            path: None,
            changed_lines: None,
        }
    }

    pub fn with_path(mut self, path: Option<&'a str>) -> Self {
        self.path = path;
        self
    }

    pub fn with_changed_lines(mut self, lines: Option<&'a BTreeSet<usize>>) -> Self {
        self.changed_lines = lines;
        self
    }

    /// Whether a 1-based line number is in scope for this scan.
    pub fn line_in_scope(&self, line_no: usize) -> bool {
        match self.changed_lines {
            Some(lines) => lines.contains(&line_no),
            None => true,
        }
    }

    /// File name component of the path, if any.
    pub fn file_name(&self) -> Option<&'a str> {
        let path = self.path?;
        Some(path.rsplit(['/', '\\']).next().unwrap_or(path))
    }
}

/// The only surface crossed by analysis plug-ins.
pub trait Detector: Send + Sync {
    /// Stable detector name, used as the `pattern` field of issues.
    fn name(&self) -> &'static str;

    /// Finding category attached to issues, e.g. `secret`.
    fn issue_kind(&self) -> &'static str;

    /// Whether this detector runs at all for the given path. Detectors that
    /// apply to any content keep the default.
    fn applies_to(&self, _path: Option<&str>) -> bool {
        true
    }

    fn scan(&self, input: &ScanInput<'_>) -> DetectorSignal;
}

/// Comment token table by file extension. Lines starting with one of these
/// tokens are comment-only and skipped by detectors.
fn comment_tokens(path: Option<&str>) -> &'static [&'static str] {
    let ext = path
        .and_then(|p| p.rsplit('.').next())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "py" | "rb" | "sh" | "bash" | "zsh" | "yml" | "yaml" | "toml" | "env" => &["#"],
        "sql" | "lua" => &["--"],
        "html" | "xml" | "vue" | "svelte" => &["<!--"],
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "java" | "c" | "h" | "cpp" | "hpp"
        | "cs" | "go" | "rs" | "swift" | "kt" | "scala" => &["//", "/*", "*"],
        _ => &["//", "#", "/*", "*"],
    }
}

/// Whether a line carries nothing but a comment for the language implied by
/// `path`.
pub fn is_comment_line(line: &str, path: Option<&str>) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return false;
    }
    comment_tokens(path)
        .iter()
        .any(|token| trimmed.starts_with(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_lines_restrict_scope() {
        let lines: BTreeSet<usize> = [2, 4].into_iter().collect();
        let input = ScanInput::new("a\nb\nc\nd").with_changed_lines(Some(&lines));
        assert!(!input.line_in_scope(1));
        assert!(input.line_in_scope(2));
        assert!(!input.line_in_scope(3));
        assert!(input.line_in_scope(4));
    }

    #[test]
    fn no_changed_lines_means_full_scan() {
        let input = ScanInput::new("a\nb");
        assert!(input.line_in_scope(1));
        assert!(input.line_in_scope(999));
    }

    #[test]
    fn comment_detection_follows_language() {
        assert!(is_comment_line("// const k = 'x'", Some("a.js")));
        assert!(is_comment_line("# SECRET=abc", Some(".env")));
        assert!(is_comment_line("  * doc line", Some("a.ts")));
        assert!(is_comment_line("-- drop table", Some("q.sql")));
        assert!(!is_comment_line("const k = 'x' // trailing", Some("a.js")));
        assert!(!is_comment_line("# python-style", Some("a.js")));
    }

    #[test]
    fn file_name_strips_directories() {
        let input = ScanInput::new("").with_path(Some("config/.env.local"));
        assert_eq!(input.file_name(), Some(".env.local"));
        let input = ScanInput::new("").with_path(Some("package.json"));
        assert_eq!(input.file_name(), Some("package.json"));
    }
}
