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

//! Workspace-confinement path validation.
//!
//! Every file path supplied by a client passes through here before any
//! filesystem access. The contract: return the real absolute path iff the
//! candidate resolves (after following symlinks) to a location inside the
//! workspace root, otherwise reject. Each rejection carries a coarse reason
//! tag for telemetry; the full path never appears in caller-facing errors.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of path bytes included in a telemetry sample.
pub const MAX_SAMPLE_BYTES: usize = 100;

/// URL-encoded traversal sequences rejected before any decoding happens.
/// Matching is case-insensitive on the candidate.
const ENCODED_TRAVERSAL_TOKENS: &[&str] = &[
    "%2e%2e%2f",
    "%2e%2e/",
    "..%2f",
    "%252e",
    "%252f",
    "%2e%2e%5c",
    "..%5c",
];

#[derive(Debug, Error)]
pub enum PathViolation {
    #[error("path is empty")]
    Empty,
    #[error("path contains a NUL byte")]
    NulByte,
    #[error("path contains an encoded traversal sequence")]
    EncodedTraversal,
    #[error("path contains a parent-directory segment")]
    Traversal,
    #[error("UNC and drive-letter paths are not allowed")]
    WindowsPrefix,
    #[error("absolute paths are not allowed here")]
    Absolute,
    #[error("path resolves outside the workspace")]
    OutsideWorkspace,
    #[error("parent directory does not exist")]
    MissingParent,
    #[error("path could not be resolved")]
    Io(#[from] std::io::Error),
}

impl PathViolation {
    /// Coarse reason tag reported to the telemetry sink.
    pub fn reason(&self) -> &'static str {
        match self {
            PathViolation::Empty => "empty_path",
            PathViolation::NulByte => "nul_byte",
            PathViolation::EncodedTraversal => "encoded_traversal",
            PathViolation::Traversal => "path_traversal",
            PathViolation::WindowsPrefix => "windows_path",
            PathViolation::Absolute => "absolute_path",
            PathViolation::OutsideWorkspace => "outside_workspace",
            PathViolation::MissingParent => "missing_parent",
            PathViolation::Io(_) => "io_error",
        }
    }
}

/// Truncated path sample safe to attach to a telemetry event.
pub fn sample(candidate: &str) -> String {
    if candidate.len() <= MAX_SAMPLE_BYTES {
        return candidate.to_string();
    }
    let mut end = MAX_SAMPLE_BYTES;
    while end > 0 && !candidate.is_char_boundary(end) {
        end -= 1;
    }
    candidate[..end].to_string()
}

/// Lexical checks shared by both validators. These run before the
/// filesystem is touched so they hold even for paths that do not exist.
fn reject_lexical(candidate: &str) -> Result<(), PathViolation> {
    if candidate.trim().is_empty() {
        return Err(PathViolation::Empty);
    }
    if candidate.contains('\0') {
        return Err(PathViolation::NulByte);
    }
    let lowered = candidate.to_ascii_lowercase();
    if ENCODED_TRAVERSAL_TOKENS
        .iter()
        .any(|token| lowered.contains(token))
    {
        return Err(PathViolation::EncodedTraversal);
    }
    if candidate.starts_with("\\\\") {
        return Err(PathViolation::WindowsPrefix);
    }
    let bytes = candidate.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(PathViolation::WindowsPrefix);
    }
    // Segment equality, not substring: "config..json" must be accepted.
    if candidate
        .split(['/', '\\'])
        .any(|segment| segment == "..")
    {
        return Err(PathViolation::Traversal);
    }
    Ok(())
}

/// Validate a path that must be a plain relative label (snapshot file
/// entries). No filesystem access; absolute paths are rejected outright.
pub fn validate_relative_path(candidate: &str) -> Result<(), PathViolation> {
    reject_lexical(candidate)?;
    if Path::new(candidate).is_absolute() {
        return Err(PathViolation::Absolute);
    }
    Ok(())
}

/// Validate `candidate` against `root` and return its real absolute path.
///
/// Symlinks are followed; the resolved path must equal the root or sit
/// strictly below it. The target file itself may not exist yet, but its
/// parent directory must.
pub fn validate_workspace_path(
    candidate: &str,
    root: &Path,
) -> Result<PathBuf, PathViolation> {
    reject_lexical(candidate)?;

    let root = root.canonicalize()?;
    let joined = if Path::new(candidate).is_absolute() {
        PathBuf::from(candidate)
    } else {
        root.join(candidate)
    };

    let resolved = match joined.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            // Target does not exist yet: resolve through the parent, which
            // must exist, then re-append the final component.
            let parent = joined.parent().ok_or(PathViolation::MissingParent)?;
            let file_name = joined
                .file_name()
                .ok_or(PathViolation::MissingParent)?
                .to_owned();
            let parent = parent
                .canonicalize()
                .map_err(|_| PathViolation::MissingParent)?;
            parent.join(file_name)
        }
    };

    if resolved != root && !resolved.starts_with(&root) {
        return Err(PathViolation::OutsideWorkspace);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn accepts_plain_file_inside_root() {
        let dir = workspace();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let resolved = validate_workspace_path("a.txt", dir.path()).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn accepts_double_dot_in_filename() {
        let dir = workspace();
        fs::write(dir.path().join("config..json"), "{}").unwrap();
        assert!(validate_workspace_path("config..json", dir.path()).is_ok());
    }

    #[test]
    fn accepts_not_yet_existing_file_with_existing_parent() {
        let dir = workspace();
        assert!(validate_workspace_path("new-file.txt", dir.path()).is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("", dir.path()),
            Err(PathViolation::Empty)
        ));
        assert!(matches!(
            validate_workspace_path("   ", dir.path()),
            Err(PathViolation::Empty)
        ));
    }

    #[test]
    fn rejects_nul_byte() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("a\0b", dir.path()),
            Err(PathViolation::NulByte)
        ));
    }

    #[test]
    fn rejects_encoded_traversal_tokens() {
        let dir = workspace();
        for candidate in [
            "%2e%2e%2fetc/passwd",
            "%2E%2E/secret",
            "..%2Fescape",
            "a%252e%252e",
            "..%5cwindows",
        ] {
            assert!(
                matches!(
                    validate_workspace_path(candidate, dir.path()),
                    Err(PathViolation::EncodedTraversal)
                ),
                "expected rejection for {candidate}"
            );
        }
    }

    #[test]
    fn rejects_parent_segment() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("../x", dir.path()),
            Err(PathViolation::Traversal)
        ));
        assert!(matches!(
            validate_workspace_path("a/../../b", dir.path()),
            Err(PathViolation::Traversal)
        ));
        assert!(matches!(
            validate_workspace_path("a\\..\\b", dir.path()),
            Err(PathViolation::Traversal)
        ));
    }

    #[test]
    fn rejects_windows_prefixes() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("\\\\server\\share", dir.path()),
            Err(PathViolation::WindowsPrefix)
        ));
        assert!(matches!(
            validate_workspace_path("C:\\Windows", dir.path()),
            Err(PathViolation::WindowsPrefix)
        ));
    }

    #[test]
    fn rejects_absolute_path_outside_root() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("/etc/hosts", dir.path()),
            Err(PathViolation::OutsideWorkspace)
        ));
    }

    #[test]
    fn rejects_missing_parent() {
        let dir = workspace();
        assert!(matches!(
            validate_workspace_path("no/such/dir/file.txt", dir.path()),
            Err(PathViolation::MissingParent)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_root() {
        let dir = workspace();
        let outside = workspace();
        fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(matches!(
            validate_workspace_path("link/secret", dir.path()),
            Err(PathViolation::OutsideWorkspace)
        ));
    }

    #[test]
    fn sibling_prefix_directory_is_outside() {
        let parent = workspace();
        let root = parent.path().join("ws");
        fs::create_dir(&root).unwrap();
        fs::create_dir(parent.path().join("ws-evil")).unwrap();
        fs::write(parent.path().join("ws-evil/x"), "x").unwrap();
        let candidate = parent.path().join("ws-evil/x");
        assert!(matches!(
            validate_workspace_path(candidate.to_str().unwrap(), &root),
            Err(PathViolation::OutsideWorkspace)
        ));
    }

    #[test]
    fn relative_validator_rejects_absolute() {
        assert!(matches!(
            validate_relative_path("/etc/passwd"),
            Err(PathViolation::Absolute)
        ));
        assert!(validate_relative_path("src/lib.rs").is_ok());
        assert!(validate_relative_path("config..json").is_ok());
        assert!(matches!(
            validate_relative_path("../escape"),
            Err(PathViolation::Traversal)
        ));
    }

    #[test]
    fn sample_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        let s = sample(&long);
        assert!(s.len() <= MAX_SAMPLE_BYTES);
        assert!(long.starts_with(&s));
        assert_eq!(sample("short"), "short");
    }

    #[test]
    fn reasons_are_stable_tags() {
        assert_eq!(PathViolation::Traversal.reason(), "path_traversal");
        assert_eq!(PathViolation::Empty.reason(), "empty_path");
        assert_eq!(PathViolation::OutsideWorkspace.reason(), "outside_workspace");
    }
}
