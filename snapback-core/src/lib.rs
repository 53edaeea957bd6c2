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

//! Core domain types shared by every snapback crate: the risk model,
//! caller tiers, workspace path validation, resilience primitives and the
//! telemetry event contract.

pub mod flags;
pub mod paths;
pub mod resilience;
pub mod risk;
pub mod telemetry;
pub mod tier;

pub use flags::{FeatureFlags, ML_DETECTION};
pub use paths::{validate_relative_path, validate_workspace_path, PathViolation};
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitError, RetryPolicy};
pub use risk::{cvss_band, AnalysisReport, DetectorSignal, Issue, RiskLevel, Severity};
pub use telemetry::{ChannelSink, NoopSink, TelemetryEvent, TelemetrySink};
pub use tier::Tier;
