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

//! Dangerous API usage: dynamic code evaluation, subprocess execution and
//! in-VM execution primitives.

use crate::detector::{is_comment_line, Detector, ScanInput};
use regex::Regex;
use snapback_core::{DetectorSignal, Severity};
use std::sync::LazyLock;

static DIRECT_EVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w.])eval\s*\(").expect("eval pattern"));

static INDIRECT_EVAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:window|globalThis|self)\s*\[\s*["']eval["']\s*\]"#)
        .expect("indirect eval pattern")
});

static FUNCTION_CTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"new\s+Function\s*\(").expect("function ctor pattern"));

/// `(pattern, factor, severity, score)` table for plain substring checks.
const SUBSTRING_RULES: &[(&str, &str, Severity, f64)] = &[
    (
        "child_process",
        "subprocess module import",
        Severity::High,
        0.7,
    ),
    ("execSync(", "synchronous subprocess execution", Severity::High, 0.8),
    ("spawnSync(", "synchronous subprocess spawn", Severity::High, 0.8),
    (".exec(", "subprocess execution", Severity::High, 0.75),
    (".spawn(", "subprocess spawn", Severity::High, 0.75),
    (
        "vm.runInContext",
        "in-VM code execution",
        Severity::Critical,
        0.9,
    ),
    (
        "vm.runInNewContext",
        "in-VM code execution",
        Severity::Critical,
        0.9,
    ),
    (
        "runInThisContext",
        "in-VM code execution",
        Severity::Critical,
        0.9,
    ),
    ("os.system(", "shell command execution", Severity::High, 0.8),
    (
        "subprocess.Popen",
        "subprocess execution",
        Severity::High,
        0.75,
    ),
];

pub struct DangerousApiDetector;

impl Detector for DangerousApiDetector {
    fn name(&self) -> &'static str {
        "dangerous-apis"
    }

    fn issue_kind(&self) -> &'static str {
        "dangerous_api"
    }

    fn scan(&self, input: &ScanInput<'_>) -> DetectorSignal {
        let mut signal = DetectorSignal::clean();

        for (idx, line) in input.content.lines().enumerate() {
            let line_no = idx + 1;
            if !input.line_in_scope(line_no) {
                continue;
            }
            if is_comment_line(line, input.path) {
                continue;
            }

            if DIRECT_EVAL.is_match(line) || INDIRECT_EVAL.is_match(line) {
                signal.severity = signal.severity.max(Severity::Critical);
                signal.score = signal.score.max(0.9);
                signal
                    .factors
                    .push(format!("line {line_no}: dynamic code evaluation"));
                continue;
            }
            if FUNCTION_CTOR.is_match(line) {
                signal.severity = signal.severity.max(Severity::High);
                signal.score = signal.score.max(0.85);
                signal
                    .factors
                    .push(format!("line {line_no}: Function constructor"));
                continue;
            }
            for (pattern, factor, severity, score) in SUBSTRING_RULES {
                if line.contains(pattern) {
                    signal.severity = signal.severity.max(*severity);
                    signal.score = signal.score.max(*score);
                    signal.factors.push(format!("line {line_no}: {factor}"));
                    break;
                }
            }
        }

        if !signal.factors.is_empty() {
            signal.recommendations.push(
                "Avoid dynamic code execution; prefer explicit dispatch or a parser".to_string(),
            );
        }
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(content: &str) -> DetectorSignal {
        DangerousApiDetector.scan(&ScanInput::new(content).with_path(Some("app.js")))
    }

    #[test]
    fn flags_direct_eval() {
        let signal = scan("const out = eval(userInput);");
        assert_eq!(signal.severity, Severity::Critical);
    }

    #[test]
    fn flags_indirect_eval() {
        assert!(!scan("window['eval'](payload)").is_clean());
        assert!(!scan("globalThis[\"eval\"](payload)").is_clean());
    }

    #[test]
    fn does_not_flag_identifiers_containing_eval() {
        assert!(scan("const evaluate = retrieval(x);").is_clean());
        assert!(scan("medieval(1)").is_clean());
    }

    #[test]
    fn flags_function_constructor() {
        let signal = scan("const f = new Function('a', 'return a');");
        assert!(!signal.is_clean());
        assert_eq!(signal.severity, Severity::High);
    }

    #[test]
    fn flags_subprocess_apis() {
        assert!(!scan("const { execSync } = require('child_process');").is_clean());
        assert!(!scan("cp.exec('rm -rf /tmp/x')").is_clean());
        assert!(!scan("subprocess.Popen(['ls'])").is_clean());
    }

    #[test]
    fn flags_vm_execution() {
        let signal = scan("vm.runInNewContext(code, sandbox)");
        assert_eq!(signal.severity, Severity::Critical);
    }

    #[test]
    fn skips_comments() {
        assert!(scan("// eval(old) was removed").is_clean());
    }
}
