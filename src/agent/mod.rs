//! Agent module - completion gateway, conversation state and the agentic loop
//!
//! This module handles the model side of the bridge:
//! - Chat completion client with function calling
//! - Append-only conversation history
//! - The default system prompt
//! - The loop that alternates between the model and MCP tool calls

mod agentic_loop;
mod client;
mod conversation;
pub mod prompts;
mod types;

pub use agentic_loop::{
    Agent, LoopCallback, LoopConfig, LoopState, NoOpCallback, ToolObservation, TurnOutput,
};
pub use client::{ChatCompletionClient, CompletionGateway};
pub use conversation::Conversation;
pub use types::*;
