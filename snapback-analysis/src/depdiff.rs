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

//! Dependency-change analysis: diff two dependency maps and bucket each
//! change by the advisory database's CVSS bands.

use crate::advisories::AdvisoryDb;
use serde::Serialize;
use serde_json::Value;
use snapback_core::Severity;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added { version: String },
    Removed { version: String },
    Updated { from: String, to: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyChange {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub severity: Severity,
    /// Advisory ids that apply to the resulting version.
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyDiff {
    pub changes: Vec<DependencyChange>,
    pub severity: Severity,
    pub recommendations: Vec<String>,
}

/// Flatten a tool argument into a `name -> version` map. Accepts either a
/// direct map or a manifest-shaped object with `dependencies` /
/// `devDependencies` sections.
pub fn flatten_dependency_map(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(object) = value.as_object() else {
        return out;
    };
    let nested = object.contains_key("dependencies") || object.contains_key("devDependencies");
    if nested {
        for section in ["dependencies", "devDependencies"] {
            if let Some(deps) = object.get(section).and_then(|v| v.as_object()) {
                for (name, version) in deps {
                    if let Some(version) = version.as_str() {
                        out.insert(name.clone(), version.to_string());
                    }
                }
            }
        }
    } else {
        for (name, version) in object {
            if let Some(version) = version.as_str() {
                out.insert(name.clone(), version.to_string());
            }
        }
    }
    out
}

pub fn diff_dependencies(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
    advisories: &AdvisoryDb,
) -> DependencyDiff {
    let mut changes = Vec::new();
    let mut worst = Severity::Low;
    let mut recommendations = Vec::new();

    for (name, version) in after {
        match before.get(name) {
            None => {
                let hits = advisories.lookup(name, version);
                let severity = hits
                    .iter()
                    .map(|a| a.severity())
                    .max()
                    .unwrap_or(Severity::Low);
                worst = worst.max(severity);
                if !hits.is_empty() {
                    recommendations
                        .push(format!("Review {name}@{version}: known advisories apply"));
                }
                changes.push(DependencyChange {
                    name: name.clone(),
                    kind: ChangeKind::Added {
                        version: version.clone(),
                    },
                    severity,
                    advisories: hits.iter().map(|a| a.id.clone()).collect(),
                });
            }
            Some(previous) if previous != version => {
                let hits = advisories.lookup(name, version);
                let severity = hits
                    .iter()
                    .map(|a| a.severity())
                    .max()
                    .unwrap_or(Severity::Low);
                worst = worst.max(severity);
                if !hits.is_empty() {
                    recommendations.push(format!(
                        "The new version of {name} ({version}) has known advisories"
                    ));
                }
                changes.push(DependencyChange {
                    name: name.clone(),
                    kind: ChangeKind::Updated {
                        from: previous.clone(),
                        to: version.clone(),
                    },
                    severity,
                    advisories: hits.iter().map(|a| a.id.clone()).collect(),
                });
            }
            Some(_) => {}
        }
    }

    for (name, version) in before {
        if !after.contains_key(name) {
            changes.push(DependencyChange {
                name: name.clone(),
                kind: ChangeKind::Removed {
                    version: version.clone(),
                },
                severity: Severity::Low,
                advisories: Vec::new(),
            });
        }
    }

    DependencyDiff {
        changes,
        severity: worst,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisories::Advisory;
    use serde_json::json;

    fn deps(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn db() -> AdvisoryDb {
        AdvisoryDb::from_advisories(vec![Advisory {
            id: "ADV-9".into(),
            package: "event-stream".into(),
            affected: "3.3.6".into(),
            cvss: 9.0,
            summary: "malicious release".into(),
        }])
    }

    #[test]
    fn detects_adds_removes_and_updates() {
        let before = deps(&[("react", "18.2.0"), ("lodash", "4.17.21")]);
        let after = deps(&[("react", "18.3.0"), ("axios", "1.7.0")]);
        let diff = diff_dependencies(&before, &after, &AdvisoryDb::empty());

        assert_eq!(diff.changes.len(), 3);
        let kinds: Vec<_> = diff
            .changes
            .iter()
            .map(|c| (c.name.as_str(), &c.kind))
            .collect();
        assert!(kinds.iter().any(|(n, k)| *n == "axios"
            && matches!(k, ChangeKind::Added { version } if version == "1.7.0")));
        assert!(kinds.iter().any(|(n, k)| *n == "react"
            && matches!(k, ChangeKind::Updated { from, to } if from == "18.2.0" && to == "18.3.0")));
        assert!(kinds.iter().any(|(n, k)| *n == "lodash"
            && matches!(k, ChangeKind::Removed { .. })));
    }

    #[test]
    fn advisory_bucketing_applies_to_new_version() {
        let before = deps(&[]);
        let after = deps(&[("event-stream", "3.3.6")]);
        let diff = diff_dependencies(&before, &after, &db());
        assert_eq!(diff.severity, Severity::Critical);
        assert_eq!(diff.changes[0].advisories, vec!["ADV-9".to_string()]);
        assert!(!diff.recommendations.is_empty());
    }

    #[test]
    fn unchanged_maps_produce_no_changes() {
        let same = deps(&[("react", "18.2.0")]);
        let diff = diff_dependencies(&same, &same, &AdvisoryDb::empty());
        assert!(diff.changes.is_empty());
        assert_eq!(diff.severity, Severity::Low);
    }

    #[test]
    fn flattens_manifest_shaped_input() {
        let value = json!({
            "dependencies": {"a": "1.0.0"},
            "devDependencies": {"b": "2.0.0"}
        });
        let flat = flatten_dependency_map(&value);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["a"], "1.0.0");

        let direct = json!({"a": "1.0.0"});
        assert_eq!(flatten_dependency_map(&direct)["a"], "1.0.0");
    }
}
