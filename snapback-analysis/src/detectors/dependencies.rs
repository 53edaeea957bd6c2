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

//! Dependency hygiene for `package.json`, backed by the offline advisory
//! database.

use crate::advisories::AdvisoryDb;
use crate::detector::{Detector, ScanInput};
use snapback_core::DetectorSignal;
use std::sync::Arc;

pub struct DependencyDetector {
    advisories: Arc<AdvisoryDb>,
}

impl DependencyDetector {
    pub fn new(advisories: Arc<AdvisoryDb>) -> Self {
        Self { advisories }
    }
}

impl Detector for DependencyDetector {
    fn name(&self) -> &'static str {
        "dependency-hygiene"
    }

    fn issue_kind(&self) -> &'static str {
        "dependency"
    }

    fn applies_to(&self, path: Option<&str>) -> bool {
        path.map(|p| p.rsplit(['/', '\\']).next() == Some("package.json"))
            .unwrap_or(false)
    }

    fn scan(&self, input: &ScanInput<'_>) -> DetectorSignal {
        let mut signal = DetectorSignal::clean();
        if !self.applies_to(input.path) {
            return signal;
        }
        let Ok(manifest) = serde_json::from_str::<serde_json::Value>(input.content) else {
            return signal;
        };

        for section in ["dependencies", "devDependencies"] {
            let Some(deps) = manifest.get(section).and_then(|v| v.as_object()) else {
                continue;
            };
            for (package, version) in deps {
                let Some(version) = version.as_str() else {
                    continue;
                };
                for advisory in self.advisories.lookup(package, version) {
                    let severity = advisory.severity();
                    signal.severity = signal.severity.max(severity);
                    signal.score = signal.score.max(match severity {
                        snapback_core::Severity::Critical => 1.0,
                        snapback_core::Severity::High => 0.8,
                        snapback_core::Severity::Medium => 0.5,
                        snapback_core::Severity::Low => 0.25,
                    });
                    signal.factors.push(format!(
                        "{package}@{version}: {} ({})",
                        advisory.summary, advisory.id
                    ));
                    signal
                        .recommendations
                        .push(format!("Upgrade {package} past the affected range"));
                }
            }
        }
        signal
    }
}
