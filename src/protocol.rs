//! JSON-RPC 2.0 and MCP message types for the gateway's wire surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "maas-mcp-gateway";

/// JSON-RPC request id: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

impl InitializeResult {
    pub fn current() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION,
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: SERVER_NAME,
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: ListChanged,
    pub resources: ListChanged,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ListChanged {
                list_changed: false,
            },
            resources: ListChanged {
                list_changed: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListChanged {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// One entry of the `tools/list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One entry of the `resources/list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

/// `tools/call` params.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(rename = "_meta", default)]
    pub meta: Option<CallMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallMeta {
    #[serde(rename = "progressToken", default)]
    pub progress_token: Option<Value>,
}

/// `resources/read` params.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

/// Tool result envelope: `{content: [...], isError}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Pretty-printed JSON payload as a text content item.
    pub fn json(value: &Value) -> Self {
        let text =
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text(text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
}

/// `resources/read` result.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReadResult {
    pub contents: Vec<ResourceContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    pub text: String,
}

impl ResourceReadResult {
    pub fn json(uri: impl Into<String>, value: &Value) -> Self {
        let text =
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            contents: vec![ResourceContent {
                uri: uri.into(),
                mime_type: "application/json",
                text,
            }],
        }
    }
}

/// Params for `notifications/progress` emitted by the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressNotification {
    #[serde(rename = "progressToken")]
    pub progress_token: Value,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressNotification {
    /// Map a tracker progress event onto notification params. Transports
    /// that can push JSON-RPC notifications call this for tool calls that
    /// supplied a `_meta.progressToken`; other event kinds yield nothing.
    pub fn from_event(progress_token: Value, event: &mmg_progress::Event) -> Option<Self> {
        match &event.payload {
            mmg_progress::EventPayload::Progress {
                percent, message, ..
            } => Some(Self {
                progress_token,
                progress: u64::from(*percent),
                total: Some(100),
                message: Some(message.clone()),
            }),
            _ => None,
        }
    }
}
