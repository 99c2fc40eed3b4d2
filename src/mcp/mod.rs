//! MCP (Model Context Protocol) module
//!
//! Connects to one MCP server, discovers its tools (and, when the server has
//! them, resources and prompts) and invokes tools on the agent's behalf.
//!
//! ## Architecture
//!
//! - **client**: session lifecycle, discovery and invocation
//! - **protocol**: Wire protocol types (JSON-RPC based)
//! - **transport**: stdio and streamable-HTTP transports
//! - **bridge**: translation into the chat-completion function-calling shapes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mcpagent::config::{McpConfig, McpServerConfig};
//! use mcpagent::mcp::McpClient;
//!
//! # async fn example() -> mcpagent::Result<()> {
//! let config = McpConfig {
//!     server: McpServerConfig::Docker {
//!         image: "mcp/duckduckgo:latest".into(),
//!         runner: "docker".into(),
//!     },
//!     ..Default::default()
//! };
//! let client = McpClient::connect(&config).await?;
//!
//! let tools = client.list_tools().await?;
//! let prompts = client.list_prompts().await?; // empty if unsupported
//!
//! let result = client.call_tool("search", serde_json::json!({"query": "rust"})).await?;
//! println!("{}", result);
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
mod client;
mod protocol;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Capability, McpClient, Session, ToolOutput};
pub use protocol::{
    InitializeResult, McpContent, McpError, McpNotification, McpPrompt, McpPromptArgument, McpRequest,
    McpResource, McpResponse, McpTool, McpToolResult, ServerCapabilities, ServerInfo,
    PROTOCOL_VERSION,
};
pub use transport::{HttpTransport, StdioTransport, Transport, SESSION_HEADER};
