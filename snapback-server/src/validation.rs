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

//! Input size caps for tool arguments. Typed argument structs reject
//! unknown fields via serde; the helpers here enforce the byte budgets and
//! report the first failing field.

use snapback_core::Issue;
use thiserror::Error;

/// Maximum size of a code payload.
pub const MAX_CODE_BYTES: usize = 1_048_576; // 1 MiB
/// Maximum length of a file path argument.
pub const MAX_PATH_BYTES: usize = 4_096; // 4 KiB
/// Maximum size of surrounding-code context.
pub const MAX_CONTEXT_BYTES: usize = 102_400; // 100 KiB
/// Maximum length of a snapshot reason/description.
pub const MAX_REASON_BYTES: usize = 1_024; // 1 KiB
/// Issues beyond this count are dropped from displayed results.
pub const MAX_DISPLAYED_ISSUES: usize = 100;

#[derive(Debug, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub fn check_size(
    field: &'static str,
    value: &str,
    cap: usize,
) -> Result<(), ValidationError> {
    if value.len() > cap {
        return Err(ValidationError::new(
            field,
            format!("{} bytes exceeds the {} byte limit", value.len(), cap),
        ));
    }
    Ok(())
}

pub fn check_code_size(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_size(field, value, MAX_CODE_BYTES)
}

pub fn check_path_size(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_size(field, value, MAX_PATH_BYTES)
}

pub fn check_reason_size(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_size(field, value, MAX_REASON_BYTES)
}

/// Cap the displayed issue list.
pub fn truncate_issues(issues: &mut Vec<Issue>) {
    issues.truncate(MAX_DISPLAYED_ISSUES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapback_core::Severity;

    #[test]
    fn size_caps_report_the_field() {
        let err = check_size("reason", &"x".repeat(2000), MAX_REASON_BYTES).unwrap_err();
        assert_eq!(err.field, "reason");
        assert!(err.to_string().starts_with("invalid reason"));
    }

    #[test]
    fn values_at_the_cap_pass() {
        assert!(check_size("path", &"p".repeat(MAX_PATH_BYTES), MAX_PATH_BYTES).is_ok());
        assert!(check_size("path", &"p".repeat(MAX_PATH_BYTES + 1), MAX_PATH_BYTES).is_err());
    }

    #[test]
    fn issue_list_is_truncated_to_cap() {
        let mut issues: Vec<Issue> = (0..250)
            .map(|i| Issue {
                kind: "secret".into(),
                severity: Severity::Low,
                message: format!("issue {i}"),
                pattern: "test".into(),
                line: None,
            })
            .collect();
        truncate_issues(&mut issues);
        assert_eq!(issues.len(), MAX_DISPLAYED_ISSUES);
    }
}
