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

//! Native tool handlers.
//!
//! Each tool parses its arguments once at the boundary into a typed struct
//! (unknown fields rejected), applies the size caps, then runs fully typed
//! against the shared services.

use crate::auth::AuthResult;
use crate::docs::{DocsError, DocsProxy};
use crate::mcp::protocol::CallToolResult;
use crate::routing::AnalysisRouter;
use crate::tools::registry::{ExternalToolManager, ToolCatalog};
use crate::validation::{
    check_code_size, check_path_size, check_reason_size, truncate_issues, ValidationError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use snapback_analysis::{diff_dependencies, flatten_dependency_map, AdvisoryDb};
use snapback_core::paths::{sample, validate_relative_path, validate_workspace_path};
use snapback_core::{TelemetryEvent, TelemetrySink};
use snapback_storage::{NewSnapshotFile, SnapshotError, SnapshotOptions, SnapshotStore};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    /// Deliberately detail-free; the telemetry event carries the reason.
    #[error("invalid path")]
    PathSecurity,
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Docs(#[from] DocsError),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Internal(String),
    #[error("request cancelled")]
    Cancelled,
}

impl From<ValidationError> for ToolExecutionError {
    fn from(error: ValidationError) -> Self {
        ToolExecutionError::Validation {
            field: error.field,
            reason: error.reason,
        }
    }
}

/// Long-lived services shared by every handler. Constructed once at server
/// start and passed by reference; nothing here hides behind globals.
pub struct ToolServices {
    pub catalog: ToolCatalog,
    pub router: AnalysisRouter,
    pub store: Arc<SnapshotStore>,
    pub docs: Option<Arc<DocsProxy>>,
    pub advisories: Arc<AdvisoryDb>,
    pub external: Vec<Arc<dyn ExternalToolManager>>,
    pub workspace_root: PathBuf,
    pub telemetry: Arc<dyn TelemetrySink>,
}

pub async fn execute(
    services: &ToolServices,
    name: &str,
    arguments: Value,
    auth: &AuthResult,
    cancel: &CancellationToken,
) -> Result<CallToolResult, ToolExecutionError> {
    match name {
        "snapback.analyze_risk" => analyze_risk(services, arguments, auth, cancel).await,
        "snapback.check_dependencies" => check_dependencies(services, arguments),
        "snapback.create_snapshot" => create_snapshot(services, arguments),
        "snapback.list_snapshots" => list_snapshots(services, arguments),
        "snapback.restore_snapshot" => restore_snapshot(services, arguments),
        "catalog.list_tools" => aggregate_tools(services, arguments).await,
        "ctx7.resolve-library-id" => resolve_library_id(services, arguments).await,
        "ctx7.get-library-docs" => get_library_docs(services, arguments).await,
        external if ToolCatalog::is_external(external) => {
            delegate_external(services, external, arguments).await
        }
        other => Err(ToolExecutionError::UnknownTool(other.to_string())),
    }
}

fn parse_params<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolExecutionError> {
    serde_json::from_value(arguments).map_err(|e| ToolExecutionError::Validation {
        field: "arguments",
        reason: e.to_string(),
    })
}

// =============================================================================
// snapback.analyze_risk
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyzeRiskParams {
    changes: Vec<ChangeHunk>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangeHunk {
    #[serde(default)]
    added: Option<bool>,
    #[serde(default)]
    removed: Option<bool>,
    value: String,
    #[serde(default)]
    #[allow(dead_code)]
    count: Option<u32>,
}

async fn analyze_risk(
    services: &ToolServices,
    arguments: Value,
    auth: &AuthResult,
    cancel: &CancellationToken,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: AnalyzeRiskParams = parse_params(arguments)?;
    if params.changes.is_empty() {
        return Err(ToolExecutionError::Validation {
            field: "changes",
            reason: "at least one change hunk is required".into(),
        });
    }

    // Rebuild the post-change file: removed hunks vanish, added lines are
    // the changed set handed to diff-aware detectors.
    let mut content = String::new();
    let mut changed_lines: BTreeSet<usize> = BTreeSet::new();
    let mut any_added = false;
    let mut line_no = 1usize;
    for hunk in &params.changes {
        if hunk.removed == Some(true) {
            continue;
        }
        let added = hunk.added == Some(true);
        any_added |= added;
        for line in hunk.value.lines() {
            content.push_str(line);
            content.push('\n');
            if added {
                changed_lines.insert(line_no);
            }
            line_no += 1;
        }
    }
    check_code_size("changes", &content)?;

    let changed = if any_added { Some(&changed_lines) } else { None };
    let mut report = services
        .router
        .analyze(&content, None, changed, auth, cancel)
        .await;
    truncate_issues(&mut report.issues);

    let value = serde_json::to_value(&report)
        .map_err(|e| ToolExecutionError::Internal(e.to_string()))?;
    Ok(CallToolResult::json(value))
}

// =============================================================================
// snapback.check_dependencies
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckDependenciesParams {
    before: Value,
    after: Value,
}

fn check_dependencies(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: CheckDependenciesParams = parse_params(arguments)?;
    let before = flatten_dependency_map(&params.before);
    let after = flatten_dependency_map(&params.after);
    let diff = diff_dependencies(&before, &after, &services.advisories);
    let value = serde_json::to_value(&diff)
        .map_err(|e| ToolExecutionError::Internal(e.to_string()))?;
    Ok(CallToolResult::json(value))
}

// =============================================================================
// snapback.create_snapshot
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateSnapshotParams {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    files: Option<Vec<FileSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSpec {
    path: String,
    content: String,
}

fn create_snapshot(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: CreateSnapshotParams = parse_params(arguments)?;
    if let Some(reason) = &params.reason {
        check_reason_size("reason", reason)?;
    }

    let files: Vec<NewSnapshotFile> = match (params.files, params.file_path, params.content) {
        (Some(files), _, _) if !files.is_empty() => files
            .into_iter()
            .map(|f| NewSnapshotFile {
                path: f.path,
                content: f.content,
            })
            .collect(),
        (_, Some(path), Some(content)) => vec![NewSnapshotFile { path, content }],
        _ => {
            return Err(ToolExecutionError::Validation {
                field: "files",
                reason: "provide files[] or filePath plus content".into(),
            })
        }
    };

    for file in &files {
        check_path_size("path", &file.path)?;
        check_code_size("content", &file.content)?;
        if let Err(violation) = validate_relative_path(&file.path) {
            services.telemetry.record(TelemetryEvent::PathValidationFailed {
                reason: violation.reason(),
                sample: sample(&file.path),
            });
            return Err(ToolExecutionError::PathSecurity);
        }
    }

    let outcome = services.store.create(
        files,
        SnapshotOptions {
            description: params.reason,
            protected: false,
        },
    )?;

    Ok(CallToolResult::json(json!({
        "snapshotId": outcome.snapshot.id,
        "createdAtMs": outcome.snapshot.created_at_ms,
        "fileCount": outcome.snapshot.files.len(),
        "deduplicated": outcome.deduplicated,
        "description": outcome.snapshot.description,
    })))
}

// =============================================================================
// snapback.list_snapshots
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyParams {}

fn list_snapshots(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let _params: EmptyParams = parse_params(arguments)?;
    let snapshots = services.store.list();
    let value = serde_json::to_value(&snapshots)
        .map_err(|e| ToolExecutionError::Internal(e.to_string()))?;
    Ok(CallToolResult::json(json!({
        "snapshots": value,
        "count": snapshots.len(),
    })))
}

// =============================================================================
// snapback.restore_snapshot
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RestoreSnapshotParams {
    snapshot_id: String,
    #[serde(default)]
    target_path: Option<String>,
}

fn restore_snapshot(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: RestoreSnapshotParams = parse_params(arguments)?;

    let target = match &params.target_path {
        Some(raw) => {
            check_path_size("targetPath", raw)?;
            match validate_workspace_path(raw, &services.workspace_root) {
                Ok(path) => Some(path),
                Err(violation) => {
                    services.telemetry.record(TelemetryEvent::PathValidationFailed {
                        reason: violation.reason(),
                        sample: sample(raw),
                    });
                    return Err(ToolExecutionError::PathSecurity);
                }
            }
        }
        None => None,
    };

    let outcome = services
        .store
        .restore(&params.snapshot_id, target.as_deref())?;
    let value = serde_json::to_value(&outcome)
        .map_err(|e| ToolExecutionError::Internal(e.to_string()))?;
    Ok(CallToolResult::json(value))
}

// =============================================================================
// catalog.list_tools
// =============================================================================

async fn aggregate_tools(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let _params: EmptyParams = parse_params(arguments)?;
    let mut tools: Vec<Value> = services
        .catalog
        .list()
        .iter()
        .map(|descriptor| descriptor.wire())
        .collect();
    for manager in &services.external {
        for descriptor in manager.list_tools().await {
            tools.push(descriptor.wire());
        }
    }
    Ok(CallToolResult::json(json!({ "tools": tools })))
}

// =============================================================================
// ctx7.* documentation tools
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ResolveLibraryParams {
    library_name: String,
}

async fn resolve_library_id(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: ResolveLibraryParams = parse_params(arguments)?;
    let docs = services.docs.as_ref().ok_or(DocsError::NotConfigured)?;
    let value = docs.resolve_library_id(&params.library_name).await?;
    Ok(CallToolResult::json((*value).clone()))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetLibraryDocsParams {
    #[serde(rename = "context7CompatibleLibraryID")]
    library_id: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    tokens: Option<u32>,
}

async fn get_library_docs(
    services: &ToolServices,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let params: GetLibraryDocsParams = parse_params(arguments)?;
    let docs = services.docs.as_ref().ok_or(DocsError::NotConfigured)?;
    let value = docs
        .get_library_docs(
            &params.library_id,
            params.topic.as_deref(),
            params.tokens,
        )
        .await?;
    Ok(CallToolResult::json((*value).clone()))
}

// =============================================================================
// External namespaces (gh., registry.)
// =============================================================================

async fn delegate_external(
    services: &ToolServices,
    name: &str,
    arguments: Value,
) -> Result<CallToolResult, ToolExecutionError> {
    let manager = services
        .external
        .iter()
        .find(|manager| name.starts_with(manager.prefix()))
        .ok_or_else(|| ToolExecutionError::UnknownTool(name.to_string()))?;
    manager
        .call(name, arguments)
        .await
        .map_err(ToolExecutionError::Internal)
}
