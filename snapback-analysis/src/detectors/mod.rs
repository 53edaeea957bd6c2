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

//! Baseline detectors shipped with the facade.

pub mod dangerous;
pub mod dependencies;
pub mod env_file;
pub mod secrets;

pub use dangerous::DangerousApiDetector;
pub use dependencies::DependencyDetector;
pub use env_file::EnvFileDetector;
pub use secrets::SecretsDetector;

/// Values that look like documentation rather than live credentials.
/// Shared by the secrets and `.env` detectors.
pub(crate) const PLACEHOLDER_MARKERS: &[&str] = &[
    "xxxx",
    "your_",
    "your-",
    "example",
    "sample",
    "placeholder",
    "changeme",
    "change_me",
    "dummy",
    "insert_",
    "<",
    "${",
    "process.env",
    "todo",
];

pub(crate) fn looks_like_placeholder(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    PLACEHOLDER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
