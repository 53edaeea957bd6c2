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

//! Risk model: levels, severities, issues and the analysis report returned
//! to callers by both the local analyzer and the upstream service.

use serde::{Deserialize, Serialize};

/// Overall risk level reported for a change set.
///
/// Ordered so that `max()` over partial results yields the worst level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Map an upstream risk label onto the local scale.
    ///
    /// `safe|low -> low`, `medium -> medium`, `high|critical -> high`;
    /// anything unrecognized maps to `none`.
    pub fn from_upstream(label: &str) -> Self {
        match label {
            "safe" | "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" | "critical" => RiskLevel::High,
            _ => RiskLevel::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Severity of an individual finding. `low < medium < high < critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Collapse a finding severity onto the caller-facing risk scale.
    pub fn risk_level(self) -> RiskLevel {
        match self {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High | Severity::Critical => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Bucket a CVSS base score into a severity band.
pub fn cvss_band(score: f64) -> Severity {
    if score >= 9.0 {
        Severity::Critical
    } else if score >= 7.0 {
        Severity::High
    } else if score >= 4.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A single finding surfaced by a detector or the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Finding category, e.g. `secret`, `dangerous_api`, `env_hygiene`.
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    /// Name of the pattern or detector that produced the finding.
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// The analysis result returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
    /// Confidence in the verdict, clamped to `[0, 1]`.
    pub confidence: f64,
    pub issues: Vec<Issue>,
    #[serde(rename = "analysisTimeMs")]
    pub analysis_ms: u64,
    #[serde(rename = "upgradePrompt")]
    pub upgrade_prompt: bool,
    pub recommendations: Vec<String>,
}

impl AnalysisReport {
    pub fn clamp_confidence(mut self) -> Self {
        if !self.confidence.is_finite() {
            self.confidence = 0.0;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Output of a single detector scan. See the detector contract in
/// `snapback-analysis`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorSignal {
    /// Scan score in `[0, 1]`.
    pub score: f64,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub severity: Severity,
}

impl DetectorSignal {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.factors.is_empty() && self.score == 0.0
    }
}
