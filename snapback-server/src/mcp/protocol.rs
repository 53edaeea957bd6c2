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

//! MCP Protocol Types
//!
//! JSON-RPC 2.0 message types plus the tool-call result shapes.
//! Reference: https://modelcontextprotocol.io/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised in `initialize` and `/version`.
pub const SERVER_NAME: &str = "snapback-mcp";

// =============================================================================
// Core JSON-RPC 2.0 Types
// =============================================================================

/// JSON-RPC 2.0 Request. A missing `id` marks a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: JsonRpcId,
}

/// JSON-RPC 2.0 ID (string, number, or null)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum JsonRpcId {
    String(String),
    Number(i64),
    Null,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Invalid request (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

// =============================================================================
// Tool Call Types
// =============================================================================

/// `call_tool` params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Content element of a tool result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "json")]
    Json { json: Value },
    #[serde(rename = "text")]
    Text { text: String },
}

/// Machine-readable error object attached to failed tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolErrorObject {
    pub message: String,
    pub code: i32,
}

/// Result of a tool call. Failures keep the same shape with `isError: true`
/// plus the error object; tier refusals are *successes* carrying the
/// upgrade marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorObject>,
}

impl CallToolResult {
    pub fn json(value: Value) -> Self {
        Self {
            content: vec![ToolContent::Json { json: value }],
            is_error: None,
            error: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, code: i32) -> Self {
        let message = message.into();
        Self {
            content: vec![ToolContent::Text {
                text: message.clone(),
            }],
            is_error: Some(true),
            error: Some(ToolErrorObject { message, code }),
        }
    }

    /// Tier refusal: a successful response whose first content element
    /// carries an "upgrade required" message and a machine-readable marker.
    pub fn upgrade_required(tool: &str) -> Self {
        Self {
            content: vec![
                ToolContent::Text {
                    text: format!(
                        "{tool} requires a Pro subscription. Upgrade to unlock snapshots \
                         and server-side analysis."
                    ),
                },
                ToolContent::Json {
                    json: serde_json::json!({
                        "upgradeRequired": true,
                        "requiredTier": "pro",
                        "tool": tool,
                    }),
                },
            ],
            is_error: None,
            error: None,
        }
    }

    /// Authentication refusal: also not a protocol error.
    pub fn access_denied(reason: &str) -> Self {
        Self {
            content: vec![
                ToolContent::Text {
                    text: format!("access denied: {reason}"),
                },
                ToolContent::Json {
                    json: serde_json::json!({ "accessDenied": true }),
                },
            ],
            is_error: None,
            error: None,
        }
    }
}

/// `list_tools` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Value>,
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Value,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_accepts_string_number_and_null() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":7}"#).unwrap();
        assert_eq!(request.id, Some(JsonRpcId::Number(7)));

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":"abc"}"#).unwrap();
        assert_eq!(request.id, Some(JsonRpcId::String("abc".into())));

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"note"}"#).unwrap();
        assert!(request.id.is_none());
    }

    #[test]
    fn tool_content_serializes_with_type_tag() {
        let result = CallToolResult::json(json!({"ok": true}));
        let raw = serde_json::to_value(&result).unwrap();
        assert_eq!(raw["content"][0]["type"], "json");
        assert_eq!(raw["content"][0]["json"]["ok"], true);
        assert!(raw.get("isError").is_none());
    }

    #[test]
    fn failure_carries_is_error_and_error_object() {
        let result = CallToolResult::failure("boom", -32603);
        let raw = serde_json::to_value(&result).unwrap();
        assert_eq!(raw["isError"], true);
        assert_eq!(raw["error"]["code"], -32603);
        assert_eq!(raw["error"]["message"], "boom");
    }

    #[test]
    fn upgrade_marker_is_a_success() {
        let result = CallToolResult::upgrade_required("snapback.list_snapshots");
        let raw = serde_json::to_value(&result).unwrap();
        assert!(raw.get("isError").is_none());
        let text = raw["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Pro subscription"));
        assert_eq!(raw["content"][1]["json"]["upgradeRequired"], true);
    }
}
