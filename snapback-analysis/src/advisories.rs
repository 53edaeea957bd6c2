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

//! Offline vulnerability database. Loaded once from a JSON fixture; lookups
//! are in-memory and never touch the network.

use serde::{Deserialize, Serialize};
use snapback_core::{cvss_band, Severity};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("failed to read advisory database: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse advisory database: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One known vulnerability for a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub package: String,
    /// Affected versions: `"*"`, an exact version, or `"<x.y.z"`.
    pub affected: String,
    pub cvss: f64,
    pub summary: String,
}

impl Advisory {
    pub fn severity(&self) -> Severity {
        cvss_band(self.cvss)
    }
}

#[derive(Debug, Default)]
pub struct AdvisoryDb {
    by_package: HashMap<String, Vec<Advisory>>,
}

impl AdvisoryDb {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_advisories(advisories: Vec<Advisory>) -> Self {
        let mut by_package: HashMap<String, Vec<Advisory>> = HashMap::new();
        for advisory in advisories {
            by_package
                .entry(advisory.package.clone())
                .or_default()
                .push(advisory);
        }
        Self { by_package }
    }

    /// Load the fixture file: a JSON array of advisories.
    pub fn load(path: &Path) -> Result<Self, AdvisoryError> {
        let raw = std::fs::read_to_string(path)?;
        let advisories: Vec<Advisory> = serde_json::from_str(&raw)?;
        Ok(Self::from_advisories(advisories))
    }

    pub fn is_empty(&self) -> bool {
        self.by_package.is_empty()
    }

    /// Advisories applying to `package` at `version`. The version string may
    /// carry a range operator prefix (`^`, `~`, `>=`, `=`), which is
    /// stripped before matching.
    pub fn lookup(&self, package: &str, version: &str) -> Vec<&Advisory> {
        let Some(advisories) = self.by_package.get(package) else {
            return Vec::new();
        };
        let version = normalize_version(version);
        advisories
            .iter()
            .filter(|advisory| affected_matches(&advisory.affected, version))
            .collect()
    }
}

fn normalize_version(version: &str) -> &str {
    version.trim_start_matches(['^', '~', '=', '>', '<', ' ', 'v'])
}

fn affected_matches(affected: &str, version: &str) -> bool {
    if affected == "*" {
        return true;
    }
    if let Some(bound) = affected.strip_prefix('<') {
        match (parse_triple(version), parse_triple(bound)) {
            (Some(v), Some(b)) => return v < b,
            _ => return false,
        }
    }
    affected == version
}

fn parse_triple(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.trim().splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch_raw = parts.next().unwrap_or("0");
    // Tolerate pre-release suffixes like "3-beta.1".
    let patch = patch_raw
        .split(['-', '+'])
        .next()
        .unwrap_or("0")
        .parse()
        .ok()?;
    Some((major, minor, patch))
}
