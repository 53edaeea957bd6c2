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

//! MCP Request Handlers
//!
//! The dispatcher behind every transport: method match, authentication,
//! tier gating, argument validation, execution and the response shape.
//! Tier and authentication refusals are successful responses carrying a
//! structured marker, never protocol errors.

use crate::auth::AuthResolver;
use crate::docs::DocsError;
use crate::mcp::protocol::*;
use crate::perf::{measured, PerfBudgets};
use crate::sanitize::ErrorSanitizer;
use crate::tools::native::{self, ToolExecutionError, ToolServices};
use crate::tools::registry::ToolCatalog;
use serde_json::json;
use snapback_storage::SnapshotError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-request context threaded from the transport.
pub struct RequestContext {
    pub raw_key: Option<String>,
    pub cancel: CancellationToken,
}

pub struct Dispatcher {
    services: ToolServices,
    auth: AuthResolver,
    sanitizer: ErrorSanitizer,
    budgets: PerfBudgets,
}

impl Dispatcher {
    pub fn new(
        services: ToolServices,
        auth: AuthResolver,
        sanitizer: ErrorSanitizer,
        budgets: PerfBudgets,
    ) -> Self {
        Self {
            services,
            auth,
            sanitizer,
            budgets,
        }
    }

    pub fn auth(&self) -> &AuthResolver {
        &self.auth
    }

    pub fn services(&self) -> &ToolServices {
        &self.services
    }

    /// Handle one JSON-RPC request. `None` means notification: nothing is
    /// written back.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &RequestContext,
    ) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(JsonRpcId::Null),
                JsonRpcError::invalid_request("invalid jsonrpc version"),
            ));
        }

        let Some(id) = request.id else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        debug!(method = %request.method, "request received");
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "list_tools" | "tools/list" => self.handle_list_tools(id),
            "call_tool" | "tools/call" => {
                self.handle_call_tool(id, request.params, ctx).await
            }
            other => {
                warn!(method = %other, "unknown method");
                JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))
            }
        };
        Some(response)
    }

    fn handle_initialize(&self, id: JsonRpcId) -> JsonRpcResponse {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    fn handle_list_tools(&self, id: JsonRpcId) -> JsonRpcResponse {
        let result = ListToolsResult {
            tools: self
                .services
                .catalog
                .list()
                .iter()
                .map(|descriptor| descriptor.wire())
                .collect(),
        };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    async fn handle_call_tool(
        &self,
        id: JsonRpcId,
        params: Option<serde_json::Value>,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let call_params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("invalid tool call params: {e}")),
                    )
                }
            },
            None => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params("missing tool call params"),
                )
            }
        };

        let CallToolParams { name, arguments } = call_params;
        let name = name.as_str();
        // Clients may omit `arguments` entirely; treat that as `{}`.
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let descriptor = self.services.catalog.resolve(name);
        if descriptor.is_none() && !ToolCatalog::is_external(name) {
            return JsonRpcResponse::error(id, JsonRpcError::method_not_found(name));
        }

        let auth = measured(
            "authenticate",
            &self.budgets,
            self.services.telemetry.as_ref(),
            self.auth.authenticate(ctx.raw_key.as_deref()),
        )
        .await;

        if !auth.valid {
            let reason = auth.error.as_deref().unwrap_or("invalid credential");
            return self.tool_success(id, CallToolResult::access_denied(reason));
        }

        if let Some(descriptor) = descriptor {
            if !auth.tier.allows(descriptor.min_tier) {
                return self.tool_success(id, CallToolResult::upgrade_required(name));
            }
        }
        if !self.auth.has_tool_access(&auth, name) {
            return self.tool_success(id, CallToolResult::access_denied("missing permission"));
        }

        let operation = name.rsplit('.').next().unwrap_or(name).replace('-', "_");
        let execution = async {
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(ToolExecutionError::Cancelled),
                result = native::execute(
                    &self.services,
                    name,
                    arguments,
                    &auth,
                    &ctx.cancel,
                ) => result,
            }
        };
        let result = measured(
            &operation,
            &self.budgets,
            self.services.telemetry.as_ref(),
            execution,
        )
        .await;

        match result {
            Ok(tool_result) => self.tool_success(id, tool_result),
            Err(error) => self.tool_failure(id, name, error),
        }
    }

    fn tool_success(&self, id: JsonRpcId, result: CallToolResult) -> JsonRpcResponse {
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    /// Map execution errors onto the response shape. Handler failures keep
    /// the tool-result shape with `isError`; only malformed requests become
    /// protocol errors.
    fn tool_failure(
        &self,
        id: JsonRpcId,
        tool: &str,
        error: ToolExecutionError,
    ) -> JsonRpcResponse {
        match error {
            ToolExecutionError::Validation { .. } => {
                JsonRpcResponse::error(id, JsonRpcError::invalid_params(error.to_string()))
            }
            ToolExecutionError::UnknownTool(name) => {
                JsonRpcResponse::error(id, JsonRpcError::method_not_found(&name))
            }
            ToolExecutionError::PathSecurity
            | ToolExecutionError::Snapshot(SnapshotError::InvalidPath { .. }) => {
                self.tool_success(id, CallToolResult::failure("invalid path", -32602))
            }
            ToolExecutionError::Snapshot(SnapshotError::NotFound(snapshot_id)) => self
                .tool_success(
                    id,
                    CallToolResult::failure(
                        format!("snapshot not found: {snapshot_id}"),
                        -32602,
                    ),
                ),
            ToolExecutionError::Snapshot(SnapshotError::EmptyFileSet) => self.tool_success(
                id,
                CallToolResult::failure("snapshot file set is empty", -32602),
            ),
            ToolExecutionError::Docs(DocsError::NotConfigured) => self.tool_success(
                id,
                CallToolResult::failure("documentation service is not configured", -32603),
            ),
            ToolExecutionError::Docs(docs_error) => self.tool_success(
                id,
                CallToolResult::failure(docs_error.to_string(), -32603),
            ),
            ToolExecutionError::Cancelled => self.tool_success(
                id,
                CallToolResult::failure("request cancelled", -32800),
            ),
            // Anything else goes through the sanitizer; internal detail only
            // reaches the error log.
            other => {
                let sanitized = self.sanitizer.sanitize(&other, tool);
                self.tool_success(
                    id,
                    CallToolResult::failure(
                        format!("{} (ref: {})", sanitized.public_message, sanitized.log_id),
                        sanitized.code,
                    ),
                )
            }
        }
    }
}
