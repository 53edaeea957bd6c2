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

//! Tool Registry - static catalog plus namespaced external delegation.
//!
//! Descriptors are validated once at startup; `resolve` is a constant-time
//! map lookup. External MCP servers contribute tools behind namespaced
//! prefixes through the `ExternalToolManager` contract; the registry only
//! depends on the descriptor shape.

use crate::mcp::protocol::CallToolResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use snapback_core::Tier;
use std::collections::HashMap;
use thiserror::Error;

/// Namespaces resolvable through external managers.
pub const EXTERNAL_PREFIXES: &[&str] = &["gh.", "registry."];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid tool descriptor {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },
    #[error("duplicate tool name: {0}")]
    Duplicate(String),
}

/// Static description of one invocable tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Whether serving this tool requires the upstream backend plan.
    pub requires_backend: bool,
    pub min_tier: Tier,
}

impl ToolDescriptor {
    /// Wire form exposed by `list_tools`.
    pub fn wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Contract for external MCP servers composed behind a namespace prefix.
#[async_trait]
pub trait ExternalToolManager: Send + Sync {
    /// The namespace prefix this manager serves, e.g. `gh.`.
    fn prefix(&self) -> &str;
    async fn list_tools(&self) -> Vec<ToolDescriptor>;
    async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, String>;
}

pub struct ToolCatalog {
    tools: HashMap<String, ToolDescriptor>,
    order: Vec<String>,
}

impl ToolCatalog {
    /// The fixed built-in catalog.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_descriptors(builtin_descriptors())
    }

    pub fn from_descriptors(
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<Self, CatalogError> {
        let mut tools = HashMap::new();
        let mut order = Vec::new();
        for descriptor in descriptors {
            validate_descriptor(&descriptor)?;
            if tools.contains_key(&descriptor.name) {
                return Err(CatalogError::Duplicate(descriptor.name));
            }
            order.push(descriptor.name.clone());
            tools.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { tools, order })
    }

    /// Catalog in declaration order, for protocol discovery.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .collect()
    }

    /// Constant-time lookup.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Whether a name belongs to an external namespace.
    pub fn is_external(name: &str) -> bool {
        EXTERNAL_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    }
}

fn validate_descriptor(descriptor: &ToolDescriptor) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidDescriptor {
        name: descriptor.name.clone(),
        reason: reason.to_string(),
    };
    if !descriptor.name.contains('.') {
        return Err(invalid("tool names are dotted, e.g. snapback.analyze_risk"));
    }
    if descriptor.description.trim().is_empty() {
        return Err(invalid("description is empty"));
    }
    let schema = descriptor
        .input_schema
        .as_object()
        .ok_or_else(|| invalid("input schema is not an object"))?;
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("input schema root must be an object type"));
    }
    Ok(())
}

fn builtin_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "snapback.analyze_risk".into(),
            description: "Diff-aware risk analysis of a code change".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "changes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "added": { "type": "boolean" },
                                "removed": { "type": "boolean" },
                                "value": { "type": "string" },
                                "count": { "type": "integer" }
                            },
                            "required": ["value"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["changes"],
                "additionalProperties": false
            }),
            requires_backend: false,
            min_tier: Tier::Free,
        },
        ToolDescriptor {
            name: "snapback.check_dependencies".into(),
            description: "Compare two dependency maps and flag risky changes".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "before": { "type": "object" },
                    "after": { "type": "object" }
                },
                "required": ["before", "after"],
                "additionalProperties": false
            }),
            requires_backend: false,
            min_tier: Tier::Free,
        },
        ToolDescriptor {
            name: "snapback.create_snapshot".into(),
            description: "Capture a content-addressed snapshot of one or more files".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string", "maxLength": 4096 },
                    "reason": { "type": "string", "maxLength": 1024 },
                    "content": { "type": "string" },
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string", "maxLength": 4096 },
                                "content": { "type": "string" }
                            },
                            "required": ["path", "content"],
                            "additionalProperties": false
                        }
                    }
                },
                "additionalProperties": false
            }),
            requires_backend: true,
            min_tier: Tier::Pro,
        },
        ToolDescriptor {
            name: "snapback.list_snapshots".into(),
            description: "List stored snapshots, newest first".into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            requires_backend: true,
            min_tier: Tier::Pro,
        },
        ToolDescriptor {
            name: "snapback.restore_snapshot".into(),
            description: "Restore a snapshot, optionally writing its files under a target path"
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "snapshotId": { "type": "string" },
                    "targetPath": { "type": "string", "maxLength": 4096 }
                },
                "required": ["snapshotId"],
                "additionalProperties": false
            }),
            requires_backend: true,
            min_tier: Tier::Pro,
        },
        ToolDescriptor {
            name: "catalog.list_tools".into(),
            description: "Aggregate built-in and external tool catalogs".into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            requires_backend: false,
            min_tier: Tier::Free,
        },
        ToolDescriptor {
            name: "ctx7.resolve-library-id".into(),
            description: "Resolve a library name to a documentation library id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "libraryName": { "type": "string" }
                },
                "required": ["libraryName"],
                "additionalProperties": false
            }),
            requires_backend: false,
            min_tier: Tier::Free,
        },
        ToolDescriptor {
            name: "ctx7.get-library-docs".into(),
            description: "Fetch documentation for a resolved library id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "context7CompatibleLibraryID": { "type": "string" },
                    "topic": { "type": "string" },
                    "tokens": { "type": "integer" }
                },
                "required": ["context7CompatibleLibraryID"],
                "additionalProperties": false
            }),
            requires_backend: false,
            min_tier: Tier::Free,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_validates_and_lists_in_order() {
        let catalog = ToolCatalog::builtin().unwrap();
        let names: Vec<&str> = catalog.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names[0], "snapback.analyze_risk");
        assert!(names.contains(&"ctx7.get-library-docs"));
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn resolve_finds_known_tools() {
        let catalog = ToolCatalog::builtin().unwrap();
        let descriptor = catalog.resolve("snapback.list_snapshots").unwrap();
        assert!(descriptor.requires_backend);
        assert_eq!(descriptor.min_tier, Tier::Pro);
        assert!(catalog.resolve("snapback.nope").is_none());
    }

    #[test]
    fn tier_policy_matches_the_catalog() {
        let catalog = ToolCatalog::builtin().unwrap();
        assert_eq!(
            catalog.resolve("snapback.analyze_risk").unwrap().min_tier,
            Tier::Free
        );
        assert_eq!(
            catalog.resolve("snapback.create_snapshot").unwrap().min_tier,
            Tier::Pro
        );
    }

    #[test]
    fn descriptor_validation_rejects_bad_shapes() {
        let bad = ToolDescriptor {
            name: "nodots".into(),
            description: "x".into(),
            input_schema: json!({"type": "object"}),
            requires_backend: false,
            min_tier: Tier::Free,
        };
        assert!(ToolCatalog::from_descriptors(vec![bad]).is_err());

        let bad_schema = ToolDescriptor {
            name: "a.b".into(),
            description: "x".into(),
            input_schema: json!("not an object"),
            requires_backend: false,
            min_tier: Tier::Free,
        };
        assert!(ToolCatalog::from_descriptors(vec![bad_schema]).is_err());
    }

    #[test]
    fn duplicates_are_rejected() {
        let descriptor = ToolDescriptor {
            name: "a.b".into(),
            description: "x".into(),
            input_schema: json!({"type": "object"}),
            requires_backend: false,
            min_tier: Tier::Free,
        };
        assert!(matches!(
            ToolCatalog::from_descriptors(vec![descriptor.clone(), descriptor]),
            Err(CatalogError::Duplicate(_))
        ));
    }

    #[test]
    fn external_prefixes_are_recognized() {
        assert!(ToolCatalog::is_external("gh.create_issue"));
        assert!(ToolCatalog::is_external("registry.search"));
        assert!(!ToolCatalog::is_external("snapback.analyze_risk"));
        assert!(!ToolCatalog::is_external("ctx7.resolve-library-id"));
    }
}
