//! Transports that move JSON-RPC frames between the agent and an MCP server
//!
//! - [`StdioTransport`]: spawns the server as a subprocess and talks over
//!   newline-delimited JSON on stdin/stdout (e.g. `docker run --rm -i <image>`).
//! - [`HttpTransport`]: streamable-HTTP transport for remote servers; replies
//!   arrive either as a JSON body or as a server-sent event stream.
//!
//! Stdout lines that are not JSON (startup banners, or the tail of a line
//! whose read was cut off by a request timeout) are logged and skipped.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::protocol::{McpNotification, McpRequest, McpResponse};
use crate::error::{Error, Result};

/// Header carrying the server-issued session id on the HTTP transport
pub const SESSION_HEADER: &str = "mcp-session-id";

/// How long a stdio server gets to exit after stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A bidirectional channel to one MCP server.
///
/// Teardown happens in two steps so the client can release the remote
/// session before the local resources behind it.
#[async_trait]
pub trait Transport: Send {
    /// Send a request and wait for the response carrying the same id
    async fn request(&mut self, request: &McpRequest) -> Result<McpResponse>;

    /// Send a notification; no response is expected
    async fn notify(&mut self, notification: &McpNotification) -> Result<()>;

    /// End the protocol session on the server side
    async fn close_session(&mut self) -> Result<()>;

    /// Release local resources (child process, connections)
    async fn shutdown(&mut self) -> Result<()>;

    /// Short label for logs
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

/// Subprocess transport
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    label: String,
}

impl StdioTransport {
    /// Spawn `program args...` and capture its stdio.
    ///
    /// The child is killed if the transport is dropped without `shutdown`.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        which::which(program).map_err(|e| {
            Error::Connection(format!("'{}' not found on PATH: {}", program, e))
        })?;

        debug!("Spawning MCP server: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Connection(format!("Failed to spawn MCP server '{}': {}", program, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("Failed to capture MCP server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("Failed to capture MCP server stdout".to_string()))?;

        let label = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(stderr) = child.stderr.take() {
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", label, line);
                }
            });
        }

        Ok(StdioTransport {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            label,
        })
    }

    async fn write_frame(&mut self, json: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Connection("MCP server stdin already closed".to_string()))?;

        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| Error::Connection(format!("Failed to write to MCP server: {}", e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Connection(format!("Failed to write newline to MCP server: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("Failed to flush MCP server stdin: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&mut self, request: &McpRequest) -> Result<McpResponse> {
        let json = serde_json::to_string(request)?;
        debug!("MCP request -> {}: {}", self.label, json);
        self.write_frame(&json).await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Connection(format!("Failed to read from MCP server: {}", e)))?;
            if read == 0 {
                return Err(Error::Connection(format!(
                    "MCP server {} closed its output",
                    self.label
                )));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("MCP response <- {}: {}", self.label, line);

            match match_response(line, request.id) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable line from {}: {}", self.label, e),
            }
        }
    }

    async fn notify(&mut self, notification: &McpNotification) -> Result<()> {
        let json = serde_json::to_string(notification)?;
        debug!("MCP notification -> {}: {}", self.label, json);
        self.write_frame(&json).await
    }

    async fn close_session(&mut self) -> Result<()> {
        // stdio has no session beyond the process itself
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Closing stdin asks a well-behaved server to exit
        drop(self.stdin.take());

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("MCP server {} exited: {:?}", self.label, status);
            }
            Err(_) => {
                warn!("MCP server {} did not exit in time, killing", self.label);
                self.child.kill().await?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("stdio:{}", self.label)
    }
}

/// Parse one incoming frame; `None` when it is not the reply to `id`.
fn match_response(frame: &str, id: u64) -> Result<Option<McpResponse>> {
    let value: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| Error::Protocol(format!("Failed to parse MCP frame: {} (raw: {})", e, frame)))?;

    if value.get("method").is_some() {
        debug!(
            "Ignoring server-initiated message: {}",
            value["method"].as_str().unwrap_or("?")
        );
        return Ok(None);
    }

    let response: McpResponse = serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("Failed to parse MCP response: {}", e)))?;

    if response.id != Some(id) {
        debug!("Skipping response for id {:?} (waiting for {})", response.id, id);
        return Ok(None);
    }
    Ok(Some(response))
}

// ---------------------------------------------------------------------------
// streamable HTTP
// ---------------------------------------------------------------------------

/// Streamable-HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    url: url::Url,
    session_id: Option<String>,
    /// Set by `shutdown`; later requests fail fast
    closed: bool,
}

impl HttpTransport {
    /// Create a transport for the server endpoint at `url`
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| Error::Connection(format!("Invalid MCP server URL '{}': {}", url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            url,
            session_id: None,
            closed: false,
        })
    }

    /// Session id issued by the server, if any
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn post<T: serde::Serialize + ?Sized>(&mut self, body: &T) -> Result<reqwest::Response> {
        if self.closed {
            return Err(Error::Connection(format!("HTTP transport to {} is closed", self.url)));
        }

        let mut builder = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(ref id) = self.session_id {
            builder = builder.header(SESSION_HEADER, id);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Failed to reach MCP server {}: {}", self.url, e)))?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 && self.session_id.is_some() {
                return Err(Error::Connection(format!("MCP session expired: {}", text)));
            }
            return Err(Error::Protocol(format!("MCP server returned HTTP {}: {}", status, text)));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&mut self, request: &McpRequest) -> Result<McpResponse> {
        debug!("MCP request -> {}: {}", self.url, request.method);
        let response = self.post(request).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = response.text().await?;
        debug!("MCP response <- {}: {}", self.url, body.trim());

        if is_stream {
            parse_event_stream(&body, request.id)
        } else {
            match_response(body.trim(), request.id)?.ok_or_else(|| {
                Error::Protocol(format!("No response for request {} in HTTP body", request.id))
            })
        }
    }

    async fn notify(&mut self, notification: &McpNotification) -> Result<()> {
        debug!("MCP notification -> {}: {}", self.url, notification.method);
        self.post(notification).await?;
        Ok(())
    }

    async fn close_session(&mut self) -> Result<()> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };

        let response = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &id)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Failed to close MCP session: {}", e)))?;

        // 405 means the server does not allow client-initiated termination
        let status = response.status();
        if !status.is_success() && status.as_u16() != 405 {
            return Err(Error::Protocol(format!("Closing MCP session returned HTTP {}", status)));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}

/// Pick the JSON-RPC response for `id` out of an SSE body.
fn parse_event_stream(body: &str, id: u64) -> Result<McpResponse> {
    let mut data = Vec::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.trim_start().to_string());
            continue;
        }
        if line.trim().is_empty() && !data.is_empty() {
            let frame = data.join("\n");
            data.clear();
            if let Some(response) = match_response(&frame, id)? {
                return Ok(response);
            }
        }
    }

    Err(Error::Protocol(format!("Event stream ended without a response for request {}", id)))
}
