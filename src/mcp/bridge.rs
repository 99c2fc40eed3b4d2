//! MCP-to-completion bridge
//!
//! Stateless translation between MCP shapes and the chat-completion
//! function-calling contract. Both sides describe parameters with JSON
//! Schema, so schemas pass through untouched; only missing values are filled.

use serde_json::Value;

use super::client::ToolOutput;
use super::protocol::McpTool;
use crate::agent::{FunctionDefinition, Message, ToolDefinition};
use crate::error::Result;

/// Advertise one MCP tool as a callable function
pub fn tool_definition(tool: &McpTool) -> ToolDefinition {
    let parameters = if tool.input_schema.is_null() {
        serde_json::json!({ "type": "object", "properties": {} })
    } else {
        tool.input_schema.clone()
    };

    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters,
        },
    }
}

/// Advertise every discovered tool, preserving order
pub fn tool_definitions(tools: &[McpTool]) -> Vec<ToolDefinition> {
    tools.iter().map(tool_definition).collect()
}

/// Tool-role message answering the call `tool_call_id`.
///
/// Failures are reported to the model as content so it can react to them.
pub fn tool_result_message(tool_call_id: &str, result: Result<ToolOutput>) -> Message {
    match result {
        Ok(output) => Message::tool(tool_call_id, output.into_text()),
        Err(e) => Message::tool(tool_call_id, format!("Error: {}", e)),
    }
}

/// Parse the model's JSON-encoded argument string.
///
/// An empty string means "no arguments".
pub fn parse_arguments(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}
