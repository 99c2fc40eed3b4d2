//! In-memory MCP server used by unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::protocol::{McpNotification, McpRequest, McpResponse};
use super::transport::Transport;
use crate::error::{Error, Result};

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Scripted server behaviour
#[derive(Clone, Default)]
pub struct FakeServer {
    tools: Vec<(Value, Value)>,
    prompts: bool,
    resources: Vec<(String, String)>,
    page_size: Option<usize>,
    fail_initialize: bool,
    fail_session_close: bool,
    call_delay: Option<Duration>,
    cursor_cycle: Vec<String>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool that always answers with `text`
    pub fn with_tool(self, name: &str, description: &str, text: &str) -> Self {
        self.with_raw_tool_described(
            name,
            description,
            json!({"content": [{"type": "text", "text": text}]}),
        )
    }

    /// Tool that answers with a verbatim `tools/call` result
    pub fn with_raw_tool(self, name: &str, result: Value) -> Self {
        self.with_raw_tool_described(name, "", result)
    }

    fn with_raw_tool_described(mut self, name: &str, description: &str, result: Value) -> Self {
        let mut tool = json!({
            "name": name,
            "inputSchema": {"type": "object", "properties": {"key": {"type": "string"}}}
        });
        if !description.is_empty() {
            tool["description"] = json!(description);
        }
        self.tools.push((tool, result));
        self
    }

    pub fn with_prompts(mut self) -> Self {
        self.prompts = true;
        self
    }

    pub fn with_resource(mut self, uri: &str, text: &str) -> Self {
        self.resources.push((uri.to_string(), text.to_string()));
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// `tools/list` hands out these cursors forever, wrapping around
    pub fn with_cursor_cycle(mut self, cursors: &[&str]) -> Self {
        self.cursor_cycle = cursors.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_session_close(mut self) -> Self {
        self.fail_session_close = true;
        self
    }

    fn handle(&self, request: &McpRequest) -> McpResponse {
        let id = request.id;
        let params = request.params.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" if self.fail_initialize => {
                McpResponse::failure(id, -32603, "initialization failed")
            }
            "initialize" => {
                let mut capabilities = json!({"tools": {}});
                if self.prompts {
                    capabilities["prompts"] = json!({});
                }
                if !self.resources.is_empty() {
                    capabilities["resources"] = json!({});
                }
                McpResponse::success(id, json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "serverInfo": {"name": "fake", "version": "0.0.1"}
                }))
            }
            "tools/list" if !self.cursor_cycle.is_empty() => {
                let next = match params["cursor"].as_str() {
                    Some(cursor) => {
                        let at = self.cursor_cycle.iter().position(|c| c == cursor).unwrap_or(0);
                        &self.cursor_cycle[(at + 1) % self.cursor_cycle.len()]
                    }
                    None => &self.cursor_cycle[0],
                };
                let page: Vec<Value> = self.tools.iter().map(|(t, _)| t.clone()).collect();
                McpResponse::success(id, json!({ "tools": page, "nextCursor": next }))
            }
            "tools/list" => {
                let start: usize = params["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let size = self.page_size.unwrap_or(self.tools.len().max(1));
                let end = (start + size).min(self.tools.len());
                let page: Vec<Value> = self.tools[start..end].iter().map(|(t, _)| t.clone()).collect();
                let mut result = json!({ "tools": page });
                if end < self.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                McpResponse::success(id, result)
            }
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                match self.tools.iter().find(|(t, _)| t["name"] == name) {
                    Some((_, result)) => McpResponse::success(id, result.clone()),
                    None => McpResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {}", name)),
                }
            }
            "prompts/list" if self.prompts => McpResponse::success(id, json!({
                "prompts": [{"name": "summarize", "description": "Summarize a page"}]
            })),
            "prompts/get" if self.prompts => {
                if params["name"] == "summarize" {
                    McpResponse::success(id, json!({
                        "messages": [{"role": "user", "content": {"type": "text", "text": "Summarize the page"}}]
                    }))
                } else {
                    McpResponse::failure(id, INVALID_PARAMS, "Unknown prompt")
                }
            }
            "resources/list" if !self.resources.is_empty() => {
                let resources: Vec<Value> = self
                    .resources
                    .iter()
                    .map(|(uri, _)| json!({"uri": uri, "name": uri}))
                    .collect();
                McpResponse::success(id, json!({ "resources": resources }))
            }
            "resources/read" => match self.resources.iter().find(|(uri, _)| params["uri"] == *uri) {
                Some((uri, text)) => McpResponse::success(id, json!({
                    "contents": [{"uri": uri, "text": text}]
                })),
                None => McpResponse::failure(id, INVALID_PARAMS, "Unknown resource"),
            },
            _ => McpResponse::failure(id, METHOD_NOT_FOUND, "Method not found"),
        }
    }
}

/// Observations shared between a test and its transport
#[derive(Clone, Default)]
pub struct Probe {
    methods: Arc<Mutex<Vec<String>>>,
    tool_calls: Arc<Mutex<Vec<(String, Value)>>>,
    session_closes: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl Probe {
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        self.tool_calls.lock().unwrap().clone()
    }

    pub fn session_closes(&self) -> usize {
        self.session_closes.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Transport that answers from a [`FakeServer`]
pub struct FakeTransport {
    server: FakeServer,
    probe: Probe,
}

impl FakeTransport {
    pub fn new(server: FakeServer) -> (Self, Probe) {
        let probe = Probe::default();
        (
            FakeTransport {
                server,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&mut self, request: &McpRequest) -> Result<McpResponse> {
        self.probe.methods.lock().unwrap().push(request.method.clone());

        if request.method == "tools/call" {
            let params = request.params.clone().unwrap_or(Value::Null);
            self.probe.tool_calls.lock().unwrap().push((
                params["name"].as_str().unwrap_or_default().to_string(),
                params["arguments"].clone(),
            ));
            if let Some(delay) = self.server.call_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(self.server.handle(request))
    }

    async fn notify(&mut self, notification: &McpNotification) -> Result<()> {
        self.probe.methods.lock().unwrap().push(notification.method.clone());
        Ok(())
    }

    async fn close_session(&mut self) -> Result<()> {
        self.probe.session_closes.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_session_close {
            return Err(Error::Connection("server went away".to_string()));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
