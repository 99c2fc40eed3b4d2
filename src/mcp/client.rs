//! MCP client for connecting to MCP servers
//!
//! Owns one session with one server: handshake, discovery, invocation and
//! teardown. The transport is exclusively owned by the client; dropping the
//! client without [`McpClient::disconnect`] still kills a stdio server
//! because the child process is spawned with `kill_on_drop`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{
    GetPromptResult, InitializeResult, McpContent, McpNotification, McpPrompt, McpRequest,
    McpResource, McpTool, McpToolResult, Page, ReadResourceResult,
};
use super::transport::{HttpTransport, StdioTransport, Transport};
use crate::config::{McpConfig, McpServerConfig};
use crate::error::{Error, Result};

/// A live, initialized protocol session.
#[derive(Debug, Clone)]
pub struct Session {
    /// What the server answered to `initialize`
    pub init: InitializeResult,
}

/// Outcome of probing an optional server capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability<T> {
    /// The server answered the list request
    Supported(Vec<T>),
    /// The server refused or failed the list request
    Unsupported { reason: String },
}

impl<T> Capability<T> {
    /// Items if supported, otherwise an empty list
    pub fn into_items(self) -> Vec<T> {
        match self {
            Capability::Supported(items) => items,
            Capability::Unsupported { .. } => Vec::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }

    /// Turn `Unsupported` into an error for callers that cannot do without it
    pub fn require(self, capability: &str) -> Result<Vec<T>> {
        match self {
            Capability::Supported(items) => Ok(items),
            Capability::Unsupported { reason } => Err(Error::UnsupportedCapability {
                capability: capability.to_string(),
                reason,
            }),
        }
    }
}

/// First content item of a tool result, reduced to something a chat model can read.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Text content
    Text(String),
    /// Image, audio, embedded resource, ...
    NonText { kind: String, rendered: String },
    /// The tool returned no content items
    Empty,
}

impl ToolOutput {
    /// Returned in place of content when a tool produced none
    pub const EMPTY_SENTINEL: &'static str = "No content returned from tool";

    fn from_result(result: McpToolResult) -> Self {
        match result.content.into_iter().next() {
            None => ToolOutput::Empty,
            Some(content) => match content.as_text() {
                Some(text) => ToolOutput::Text(text.to_string()),
                None => ToolOutput::NonText {
                    kind: content_kind(&content),
                    rendered: serde_json::to_string(&content).unwrap_or_default(),
                },
            },
        }
    }

    /// Plain text for the conversation
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) => text,
            ToolOutput::NonText { kind, rendered } => {
                format!("[non-text content: {}] {}", kind, rendered)
            }
            ToolOutput::Empty => Self::EMPTY_SENTINEL.to_string(),
        }
    }
}

impl std::fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.clone().into_text())
    }
}

fn content_kind(content: &McpContent) -> String {
    match content.mime_type {
        Some(ref mime) => format!("{} ({})", content.content_type, mime),
        None => content.content_type.clone(),
    }
}

fn render_content(content: &McpContent) -> String {
    match content.as_text() {
        Some(text) => text.to_string(),
        None => format!(
            "[non-text content: {}] {}",
            content_kind(content),
            serde_json::to_string(content).unwrap_or_default()
        ),
    }
}

/// MCP client for communicating with an MCP server
pub struct McpClient {
    /// Server label for logs
    name: String,
    /// `Some` between a successful handshake and teardown
    session: Mutex<Option<Session>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    /// Request ID counter
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl McpClient {
    /// Start the configured server and perform the handshake.
    ///
    /// Any failure here is a [`Error::Connection`]; nothing is retried.
    pub async fn connect(config: &McpConfig) -> Result<Self> {
        let transport: Box<dyn Transport> = match config.server {
            McpServerConfig::Docker {
                ref image,
                ref runner,
            } => {
                info!("Starting MCP server container: {}", image);
                let args = ["run", "--rm", "-i", image.as_str()].map(String::from);
                Box::new(StdioTransport::spawn(runner, &args)?)
            }
            McpServerConfig::Command {
                ref program,
                ref args,
            } => {
                info!("Starting MCP server: {} {:?}", program, args);
                Box::new(StdioTransport::spawn(program, args)?)
            }
            McpServerConfig::Http { ref url } => {
                info!("Connecting to remote MCP server: {}", url);
                Box::new(HttpTransport::new(url, config.request_timeout)?)
            }
            McpServerConfig::None => {
                return Err(Error::Config("No MCP server configured".to_string()));
            }
        };

        Self::with_transport(config.server.label(), transport, config.request_timeout).await
    }

    /// Perform the handshake over an already-established transport
    pub async fn with_transport(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = McpClient {
            name: name.into(),
            session: Mutex::new(None),
            transport: Mutex::new(Some(transport)),
            next_id: AtomicU64::new(1),
            request_timeout,
        };

        match client.initialize().await {
            Ok(init) => {
                info!(
                    "MCP session with {} initialized: server={} {}, protocol={}",
                    client.name, init.server_info.name, init.server_info.version, init.protocol_version
                );
                debug!("MCP server capabilities: {:?}", init.capabilities);
                *client.session.lock().await = Some(Session { init });
                Ok(client)
            }
            Err(e) => {
                if let Err(teardown) = client.disconnect().await {
                    debug!("Teardown after failed handshake: {}", teardown);
                }
                Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(format!(
                        "MCP handshake with {} failed: {}",
                        client.name, other
                    )),
                })
            }
        }
    }

    /// Handshake: initialize request followed by the initialized notification
    async fn initialize(&self) -> Result<InitializeResult> {
        let result = self.send(McpRequest::initialize).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Invalid initialize result: {}", e)))?;

        let mut transport = self.transport.lock().await;
        let transport = transport.as_mut().ok_or(Error::NotConnected)?;
        transport.notify(&McpNotification::initialized()).await?;

        Ok(init)
    }

    /// Send a request on the transport and unwrap the JSON-RPC envelope
    async fn send(&self, build: impl FnOnce(u64) -> McpRequest) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = build(id);

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(Error::NotConnected)?;

        // A timed-out stdio read may leave half a line behind; the transport skips it
        let response = tokio::time::timeout(self.request_timeout, transport.request(&request))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "MCP {} to {} took longer than {:?}",
                    request.method, self.name, self.request_timeout
                ))
            })??;

        if let Some(err) = response.error {
            return Err(Error::Mcp {
                code: err.code,
                message: err.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Like `send`, but only on an initialized session
    async fn call(&self, build: impl FnOnce(u64) -> McpRequest) -> Result<Value> {
        self.ensure_connected().await?;
        self.send(build).await
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.session.lock().await.is_none() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Follow `nextCursor` until the server stops returning one
    async fn list_all<T: DeserializeOwned>(
        &self,
        request: fn(u64, Option<&str>) -> McpRequest,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let result = self.call(|id| request(id, cursor.as_deref())).await?;
            let page: Page<T> = serde_json::from_value(result)
                .map_err(|e| Error::Protocol(format!("Invalid list result: {}", e)))?;
            items.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        return Err(Error::Protocol(format!(
                            "Server {} repeated list cursor '{}'",
                            self.name, next
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(items)
    }

    async fn probe<T: DeserializeOwned>(
        &self,
        capability: &str,
        request: fn(u64, Option<&str>) -> McpRequest,
    ) -> Result<Capability<T>> {
        self.ensure_connected().await?;

        match self.list_all(request).await {
            Ok(items) => Ok(Capability::Supported(items)),
            Err(Error::NotConnected) => Err(Error::NotConnected),
            Err(e) => {
                warn!("Server {} doesn't support {}: {}", self.name, capability, e);
                Ok(Capability::Unsupported {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let tools: Vec<McpTool> = self.list_all(McpRequest::list_tools).await?;
        info!("Retrieved {} tools from MCP server {}", tools.len(), self.name);
        Ok(tools)
    }

    /// Probe the server's resources
    pub async fn probe_resources(&self) -> Result<Capability<McpResource>> {
        self.probe("resources", McpRequest::list_resources).await
    }

    /// Probe the server's prompts
    pub async fn probe_prompts(&self) -> Result<Capability<McpPrompt>> {
        self.probe("prompts", McpRequest::list_prompts).await
    }

    /// Resources, or an empty list when the server has none
    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        Ok(self.probe_resources().await?.into_items())
    }

    /// Prompts, or an empty list when the server has none
    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        Ok(self.probe_prompts().await?.into_items())
    }

    /// Render a prompt as `role: text` lines
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<String> {
        let result = self
            .call(|id| McpRequest::get_prompt(id, name, arguments))
            .await?;
        let prompt: GetPromptResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Invalid prompt result for '{}': {}", name, e)))?;

        Ok(prompt
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, render_content(&m.content)))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Read a resource's contents as text
    pub async fn read_resource(&self, uri: &str) -> Result<String> {
        let result = self.call(|id| McpRequest::read_resource(id, uri)).await?;
        let read: ReadResourceResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Invalid resource result for '{}': {}", uri, e)))?;

        Ok(read
            .contents
            .iter()
            .map(|c| match (&c.text, &c.blob) {
                (Some(text), _) => text.clone(),
                (None, Some(blob)) => format!(
                    "[non-text content: blob ({})] {} base64 chars from {}",
                    c.mime_type.as_deref().unwrap_or("application/octet-stream"),
                    blob.len(),
                    c.uri
                ),
                (None, None) => format!("[empty resource: {}]", c.uri),
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        info!("Calling `{}` with {}", name, arguments);

        let result = match self
            .call(|id| McpRequest::call_tool(id, name, arguments))
            .await
        {
            Ok(result) => result,
            Err(Error::Mcp { code, message }) => {
                return Err(Error::ToolInvocation {
                    tool: name.to_string(),
                    message: format!("{} (code {})", message, code),
                });
            }
            Err(e) => return Err(e),
        };

        let tool_result: McpToolResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Failed to parse MCP tool result: {}", e)))?;

        if tool_result.is_error {
            warn!("MCP tool {} returned error", name);
            let message = tool_result
                .content
                .iter()
                .map(render_content)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::ToolInvocation {
                tool: name.to_string(),
                message: if message.is_empty() {
                    "tool reported an error without details".to_string()
                } else {
                    message
                },
            });
        }

        let output = ToolOutput::from_result(tool_result);
        debug!("Tool {} output: {}", name, output);
        Ok(output)
    }

    /// Tear down the session, then the transport.
    ///
    /// Idempotent. The transport is shut down even if closing the session
    /// fails; the first error encountered is returned after both steps ran.
    pub async fn disconnect(&self) -> Result<()> {
        let had_session = self.session.lock().await.take().is_some();
        let Some(mut transport) = self.transport.lock().await.take() else {
            debug!("MCP client {} already disconnected", self.name);
            return Ok(());
        };

        let mut first_error = None;

        if had_session {
            if let Err(e) = transport.close_session().await {
                warn!("Failed to close MCP session with {}: {}", self.name, e);
                first_error = Some(e);
            }
        }

        if let Err(e) = transport.shutdown().await {
            warn!("Failed to shut down transport {}: {}", transport.describe(), e);
            first_error.get_or_insert(e);
        }

        info!("Disconnected from MCP server {}", self.name);
        first_error.map_or(Ok(()), Err)
    }

    /// Whether the session is initialized and not torn down
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Handshake result of the live session
    pub async fn session(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if self.transport.get_mut().is_some() {
            debug!(
                "Dropping connected MCP client for {}; transport released on drop",
                self.name
            );
        }
    }
}
