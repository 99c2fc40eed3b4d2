//! MCP wire protocol types
//!
//! JSON-RPC 2.0 envelopes plus the MCP payloads this client uses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision sent in the `initialize` request
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request to an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Create a new MCP request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Create an initialize request
    pub fn initialize(id: u64) -> Self {
        Self::new(id, "initialize", Some(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        })))
    }

    /// Create a tools/list request
    pub fn list_tools(id: u64, cursor: Option<&str>) -> Self {
        Self::new(id, "tools/list", cursor_params(cursor))
    }

    /// Create a resources/list request
    pub fn list_resources(id: u64, cursor: Option<&str>) -> Self {
        Self::new(id, "resources/list", cursor_params(cursor))
    }

    /// Create a prompts/list request
    pub fn list_prompts(id: u64, cursor: Option<&str>) -> Self {
        Self::new(id, "prompts/list", cursor_params(cursor))
    }

    /// Create a resources/read request
    pub fn read_resource(id: u64, uri: impl Into<String>) -> Self {
        Self::new(id, "resources/read", Some(serde_json::json!({ "uri": uri.into() })))
    }

    /// Create a prompts/get request
    pub fn get_prompt(id: u64, name: impl Into<String>, arguments: Option<Value>) -> Self {
        let mut params = serde_json::json!({ "name": name.into() });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        Self::new(id, "prompts/get", Some(params))
    }

    /// Create a tools/call request
    pub fn call_tool(id: u64, name: impl Into<String>, arguments: Value) -> Self {
        Self::new(id, "tools/call", Some(serde_json::json!({
            "name": name.into(),
            "arguments": arguments
        })))
    }
}

fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| serde_json::json!({ "cursor": c }))
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    /// Sent once the initialize response has been received
    pub fn initialized() -> Self {
        McpNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: None,
        }
    }
}

/// JSON-RPC response from an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Successful response carrying `result`
    pub fn success(id: u64, result: Value) -> Self {
        McpResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        McpResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result of the `initialize` handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Capabilities a server declares during the handshake.
///
/// Each entry is an opaque options object; presence means "supported".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Server identification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Tool definition from an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema (JSON Schema), kept verbatim
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Resource advertised by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt template advertised by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<McpPromptArgument>,
}

/// Argument accepted by a prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// One page of a paginated list result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct Page<T> {
    #[serde(default, alias = "tools", alias = "resources", alias = "prompts")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Content block returned by a tool call or prompt message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

impl McpContent {
    /// Text payload, if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        if self.content_type == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// Result of a tools/call response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Result of a prompts/get response
#[derive(Debug, Clone, Deserialize)]
pub struct GetPromptResult {
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// One rendered prompt message
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: McpContent,
}

/// Result of a resources/read response
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

/// Contents of a single resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}
