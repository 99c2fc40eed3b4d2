//! Error types for mcpagent

use thiserror::Error;

/// Result type alias using mcpagent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcpagent
#[derive(Error, Debug)]
pub enum Error {
    /// Transport could not be established or the handshake did not complete
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation issued on a session that was never initialized or was torn down
    #[error("MCP client not connected")]
    NotConnected,

    /// Server does not support an optional capability (resources, prompts)
    #[error("Unsupported capability '{capability}': {reason}")]
    UnsupportedCapability { capability: String, reason: String },

    /// JSON-RPC error object returned by the MCP server
    #[error("MCP error {code}: {message}")]
    Mcp { code: i64, message: String },

    /// A tool call failed on the server side
    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// Completion endpoint unreachable or returned a malformed response
    #[error("Completion gateway error: {0}")]
    Gateway(String),

    /// The model kept requesting tools past the configured round limit
    #[error("Round limit exceeded: model still requesting tools after {0} rounds")]
    RoundLimitExceeded(u32),

    /// Malformed frame on the MCP wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that end the whole session rather than a single turn
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::NotConnected | Error::Config(_)
        )
    }

    /// Errors after which the user may simply retry the turn
    pub fn is_turn_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Gateway(_) | Error::RoundLimitExceeded(_) | Error::Timeout(_) | Error::Http(_)
        )
    }
}
