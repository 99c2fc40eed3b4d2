//! # mcpagent
//!
//! A console agent that bridges an MCP server to a function-calling chat
//! completion model.
//!
//! ## Features
//!
//! - **MCP client:** stdio (Docker or any command) and streamable HTTP transports
//! - **Schema translation:** MCP tools advertised as model function definitions
//! - **Agentic loop:** tool calls executed in order until the model answers
//! - **Interactive console:** chat with the model, inspect the server

pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
