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

//! Local analysis: the detector plug-in contract, the facade that sequences
//! detectors and merges their output, and the dependency-change analyzer.
//!
//! Detectors are pure functions over file content. The facade owns all I/O
//! and hands contents in as strings, which keeps detectors deterministic
//! and trivially testable.

pub mod advisories;
pub mod depdiff;
pub mod detector;
pub mod detectors;
pub mod facade;

pub use advisories::{Advisory, AdvisoryDb, AdvisoryError};
pub use depdiff::{
    diff_dependencies, flatten_dependency_map, ChangeKind, DependencyChange, DependencyDiff,
};
pub use detector::{is_comment_line, Detector, ScanInput};
pub use facade::{AnalyzerVerdict, LocalAnalyzer};
