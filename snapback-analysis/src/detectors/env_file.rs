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

//! `.env` hygiene. Applies only to environment files that are not the
//! documented example variants; flags live-looking values and risky
//! configuration smells.

use crate::detector::{Detector, ScanInput};
use crate::detectors::looks_like_placeholder;
use snapback_core::{DetectorSignal, Severity};

/// Keys whose values are configuration, not credentials.
const ALLOWLIST: &[&str] = &[
    "NODE_ENV", "PORT", "HOST", "HOSTNAME", "LOG_LEVEL", "TZ", "LANG", "PUBLIC_URL", "BASE_URL",
];

const VERBOSE_LOG_LEVELS: &[&str] = &["debug", "trace", "silly", "verbose"];

pub struct EnvFileDetector;

impl EnvFileDetector {
    fn is_env_file(path: Option<&str>) -> bool {
        let Some(path) = path else { return false };
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        name.starts_with(".env") && name != ".env.example" && name != ".env.sample"
    }
}

impl Detector for EnvFileDetector {
    fn name(&self) -> &'static str {
        "env-hygiene"
    }

    fn issue_kind(&self) -> &'static str {
        "env_hygiene"
    }

    fn applies_to(&self, path: Option<&str>) -> bool {
        Self::is_env_file(path)
    }

    fn scan(&self, input: &ScanInput<'_>) -> DetectorSignal {
        let mut signal = DetectorSignal::clean();
        if !Self::is_env_file(input.path) {
            return signal;
        }

        for (idx, line) in input.content.lines().enumerate() {
            let line_no = idx + 1;
            if !input.line_in_scope(line_no) {
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches(['"', '\'']);

            // Configuration smells first; they apply even to allowlisted keys.
            if key == "DEBUG" && value.eq_ignore_ascii_case("true") {
                signal.severity = signal.severity.max(Severity::Medium);
                signal.score = signal.score.max(0.5);
                signal
                    .factors
                    .push(format!("line {line_no}: DEBUG=true in environment file"));
                continue;
            }
            if (key == "SSL" || key.ends_with("_SSL") || key == "VERIFY_SSL")
                && value.eq_ignore_ascii_case("false")
            {
                signal.severity = signal.severity.max(Severity::High);
                signal.score = signal.score.max(0.7);
                signal
                    .factors
                    .push(format!("line {line_no}: TLS verification disabled"));
                continue;
            }
            if key == "NODE_ENV" && value.eq_ignore_ascii_case("development") {
                signal.severity = signal.severity.max(Severity::Medium);
                signal.score = signal.score.max(0.4);
                signal
                    .factors
                    .push(format!("line {line_no}: NODE_ENV=development"));
                continue;
            }
            if key == "LOG_LEVEL"
                && VERBOSE_LOG_LEVELS
                    .iter()
                    .any(|level| value.eq_ignore_ascii_case(level))
            {
                signal.severity = signal.severity.max(Severity::Medium);
                signal.score = signal.score.max(0.4);
                signal
                    .factors
                    .push(format!("line {line_no}: verbose log level"));
                continue;
            }

            if ALLOWLIST.contains(&key) {
                continue;
            }
            if value.is_empty() || value.starts_with('$') || looks_like_placeholder(value) {
                continue;
            }

            signal.severity = signal.severity.max(Severity::High);
            signal.score = signal.score.max(0.8);
            signal
                .factors
                .push(format!("line {line_no}: {key} holds a live-looking value"));
        }

        if !signal.factors.is_empty() {
            signal.recommendations.push(
                "Keep real values out of committed .env files; commit .env.example instead"
                    .to_string(),
            );
        }
        signal
    }
}
