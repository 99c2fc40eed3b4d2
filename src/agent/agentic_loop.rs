//! Agentic loop engine.
//!
//! Drives one user turn to completion: send the conversation and tool
//! descriptors to the model, execute any requested tool calls through the
//! MCP client, append the results and ask again, until the model answers
//! without requesting tools.

use crate::agent::client::CompletionGateway;
use crate::agent::conversation::Conversation;
use crate::agent::types::*;
use crate::error::{Error, Result};
use crate::mcp::{bridge, McpClient};

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configurable limits for the agentic loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model invocations allowed per user turn; `None` is unbounded.
    pub max_rounds: Option<u32>,
}

impl LoopConfig {
    /// No cap on model/tool rounds
    pub fn unbounded() -> Self {
        Self { max_rounds: None }
    }

    pub fn with_max_rounds(max_rounds: u32) -> Self {
        Self {
            max_rounds: Some(max_rounds),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::with_max_rounds(10)
    }
}

// ---------------------------------------------------------------------------
// State and trace types
// ---------------------------------------------------------------------------

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between turns
    AwaitingUserInput,
    /// Conversation sent to the model, waiting for its reply
    AwaitingModel,
    /// Running the tool calls of the latest assistant message
    ExecutingTools,
}

/// The result of executing a single tool call.
#[derive(Debug, Clone)]
pub struct ToolObservation {
    pub call_id: String,
    pub success: bool,
    pub content: String,
    pub duration_ms: u64,
}

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    /// The final assistant response text.
    pub response: String,
    /// Model invocations used.
    pub rounds: u32,
    /// Tool calls executed across all rounds.
    pub tool_calls: u32,
    /// Messages appended to the conversation by this turn.
    pub messages_added: usize,
}

// ---------------------------------------------------------------------------
// Callback trait
// ---------------------------------------------------------------------------

/// Trait for callers to hook into loop events (e.g. print progress to the
/// terminal).
#[async_trait]
pub trait LoopCallback: Send + Sync {
    /// Called before each model invocation.
    async fn on_round_start(&self, _round: u32) {}
    /// Called before a tool is invoked.
    async fn on_tool_call(&self, _tool_name: &str, _arguments: &serde_json::Value) {}
    /// Called after each individual tool has been executed.
    async fn on_tool_executed(&self, _tool_name: &str, _observation: &ToolObservation) {}
}

/// Default no-op callback.
pub struct NoOpCallback;

#[async_trait]
impl LoopCallback for NoOpCallback {}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Owns the conversation and runs turns against a model and an MCP server.
pub struct Agent<'a> {
    gateway: &'a dyn CompletionGateway,
    mcp: &'a McpClient,
    /// Pre-computed tool definitions (avoids recomputing per-round).
    tools: Vec<ToolDefinition>,
    conversation: Conversation,
    config: LoopConfig,
    state: LoopState,
}

impl<'a> Agent<'a> {
    /// Create an agent with already-translated tool definitions
    pub fn new(
        gateway: &'a dyn CompletionGateway,
        mcp: &'a McpClient,
        tools: Vec<ToolDefinition>,
        conversation: Conversation,
        config: LoopConfig,
    ) -> Self {
        Agent {
            gateway,
            mcp,
            tools,
            conversation,
            config,
            state: LoopState::AwaitingUserInput,
        }
    }

    /// Discover the server's tools and advertise all of them
    pub async fn discover(
        gateway: &'a dyn CompletionGateway,
        mcp: &'a McpClient,
        conversation: Conversation,
        config: LoopConfig,
    ) -> Result<Self> {
        let tools = bridge::tool_definitions(&mcp.list_tools().await?);
        Ok(Self::new(gateway, mcp, tools, conversation, config))
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!("Agent loop state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Run one user turn to a final answer.
    ///
    /// On error everything appended so far stays in the conversation and the
    /// agent is ready for the next turn.
    pub async fn run_turn(&mut self, input: &str, callback: &dyn LoopCallback) -> Result<TurnOutput> {
        let turn_start = Instant::now();
        let start_len = self.conversation.len();
        let mut rounds = 0;
        let mut tool_calls = 0;

        self.conversation.add_user_message(input);
        let result = self.drive(callback, &mut rounds, &mut tool_calls).await;
        self.transition(LoopState::AwaitingUserInput);

        let messages_added = self.conversation.len() - start_len;
        info!(
            "Turn finished: ok={}, rounds={}, tool_calls={}, messages_added={}, duration={}ms",
            result.is_ok(),
            rounds,
            tool_calls,
            messages_added,
            turn_start.elapsed().as_millis()
        );

        result.map(|response| TurnOutput {
            response,
            rounds,
            tool_calls,
            messages_added,
        })
    }

    async fn drive(
        &mut self,
        callback: &dyn LoopCallback,
        rounds: &mut u32,
        tool_calls: &mut u32,
    ) -> Result<String> {
        loop {
            if let Some(max) = self.config.max_rounds {
                if *rounds >= max {
                    warn!("Agent loop hit the round limit ({}) with tool calls pending", max);
                    return Err(Error::RoundLimitExceeded(max));
                }
            }
            *rounds += 1;

            self.transition(LoopState::AwaitingModel);
            callback.on_round_start(*rounds).await;

            let reply = self
                .gateway
                .complete(&self.conversation.api_messages(), &self.tools)
                .await?;
            let calls = reply.pending_tool_calls().to_vec();

            info!(
                "Round {}: has_content={}, tool_calls={}",
                rounds,
                !reply.content.is_empty(),
                calls.len()
            );

            if calls.is_empty() {
                let response = reply.content.clone();
                self.conversation.push(reply);
                return Ok(response);
            }

            self.conversation.push(reply);
            self.transition(LoopState::ExecutingTools);

            // Sequential on purpose: results land in the order they were requested
            for call in &calls {
                *tool_calls += 1;
                let message = self.execute(call, callback).await?;
                self.conversation.push(message);
            }
        }
    }

    /// Execute one tool call and produce its tool-role message.
    ///
    /// Tool failures become message content; only a lost session is an error.
    async fn execute(&self, call: &AssistantToolCall, callback: &dyn LoopCallback) -> Result<Message> {
        let tool_name = &call.function.name;
        let started = Instant::now();

        let result = match bridge::parse_arguments(&call.function.arguments) {
            Ok(args) => {
                info!("Executing tool: {} (call {})", tool_name, call.id);
                debug!("Tool {} arguments: {}", tool_name, args);
                callback.on_tool_call(tool_name, &args).await;
                self.mcp.call_tool(tool_name, args).await
            }
            Err(e) => {
                warn!("Failed to parse tool arguments for {}: {}", tool_name, e);
                Err(Error::InvalidInput(format!(
                    "arguments for '{}' are not valid JSON: {}",
                    tool_name, e
                )))
            }
        };

        let result = match result {
            Err(e) if e.is_fatal() => return Err(e),
            other => other,
        };
        if let Err(ref e) = result {
            warn!("Tool {} failed: {}", tool_name, e);
        }

        let success = result.is_ok();
        let message = bridge::tool_result_message(&call.id, result);

        let observation = ToolObservation {
            call_id: call.id.clone(),
            success,
            content: message.content.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        callback.on_tool_executed(tool_name, &observation).await;

        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::testing::{FakeServer, FakeTransport, Probe};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned assistant messages and records what it was sent
    struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<Message>>>,
        repeat: Option<Message>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Result<Message>>) -> Self {
            ScriptedGateway {
                replies: Mutex::new(replies.into()),
                repeat: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn always(reply: Message) -> Self {
            ScriptedGateway {
                repeat: Some(reply),
                ..Self::new(vec![])
            }
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn complete(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<Message> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(ref reply) = self.repeat {
                return Ok(reply.clone());
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Gateway("script exhausted".into())))
        }
    }

    async fn mcp(server: FakeServer) -> (McpClient, Probe) {
        let (transport, probe) = FakeTransport::new(server);
        let client = McpClient::with_transport("fake", Box::new(transport), Duration::from_secs(5))
            .await
            .unwrap();
        (client, probe)
    }

    fn call(id: &str, name: &str, args: &str) -> AssistantToolCall {
        AssistantToolCall::function(id, name, args)
    }

    #[tokio::test]
    async fn test_final_answer_without_tools() {
        let (client, probe) = mcp(FakeServer::new().with_tool("lookup", "", "42")).await;
        let gateway = ScriptedGateway::new(vec![Ok(Message::assistant("4"))]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::default())
            .await
            .unwrap();

        let out = agent.run_turn("what is 2+2", &NoOpCallback).await.unwrap();

        assert_eq!(out.response, "4");
        assert_eq!(out.rounds, 1);
        assert_eq!(out.tool_calls, 0);
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(agent.conversation().messages()[0].role, Role::User);
        assert_eq!(agent.conversation().messages()[1].role, Role::Assistant);
        assert!(probe.tool_calls().is_empty());
        assert_eq!(agent.state(), LoopState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_single_tool_round_trip() {
        let (client, probe) = mcp(FakeServer::new().with_tool("lookup", "Look up a value", "42")).await;
        let gateway = ScriptedGateway::new(vec![
            Ok(Message::assistant_with_calls(
                "",
                vec![call("call_X", "lookup", r#"{"key":"answer"}"#)],
            )),
            Ok(Message::assistant("The answer is 42.")),
        ]);
        let mut agent = Agent::discover(
            &gateway,
            &client,
            Conversation::new().with_system_prompt("system"),
            LoopConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(agent.tools()[0].function.name, "lookup");

        let out = agent.run_turn("what is the answer?", &NoOpCallback).await.unwrap();

        assert_eq!(out.response, "The answer is 42.");
        assert_eq!(out.rounds, 2);
        assert_eq!(out.tool_calls, 1);
        assert_eq!(out.messages_added, 4);

        let history = agent.conversation().messages();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history[2].content, "42");
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_X"));

        assert_eq!(probe.tool_calls(), vec![("lookup".to_string(), json!({"key": "answer"}))]);

        // The second request carried the tool result after the request for it
        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].len(), 4); // system + user + assistant-with-call + tool
        assert_eq!(requests[1][3].tool_call_id.as_deref(), Some("call_X"));
    }

    #[tokio::test]
    async fn test_multiple_calls_keep_request_order() {
        let server = FakeServer::new()
            .with_tool("alpha", "", "A")
            .with_tool("beta", "", "B");
        let (client, _probe) = mcp(server).await;
        let gateway = ScriptedGateway::new(vec![
            Ok(Message::assistant_with_calls(
                "",
                vec![
                    call("z-last-id", "beta", "{}"),
                    call("a-first-id", "alpha", "{}"),
                    call("m-mid-id", "beta", "{}"),
                ],
            )),
            Ok(Message::assistant("done")),
        ]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::default())
            .await
            .unwrap();

        agent.run_turn("go", &NoOpCallback).await.unwrap();

        let results: Vec<_> = agent
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap(), m.content.clone()))
            .collect();
        assert_eq!(
            results,
            vec![
                ("z-last-id".to_string(), "B".to_string()),
                ("a-first-id".to_string(), "A".to_string()),
                ("m-mid-id".to_string(), "B".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_failures_are_reported_to_the_model() {
        let (client, _probe) = mcp(FakeServer::new().with_tool("lookup", "", "42")).await;
        let gateway = ScriptedGateway::new(vec![
            Ok(Message::assistant_with_calls(
                "",
                vec![
                    call("c1", "missing_tool", "{}"),
                    call("c2", "lookup", "{not json"),
                ],
            )),
            Ok(Message::assistant("sorry, the tools failed")),
        ]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::default())
            .await
            .unwrap();

        let out = agent.run_turn("try it", &NoOpCallback).await.unwrap();
        assert_eq!(out.response, "sorry, the tools failed");

        let history = agent.conversation().messages();
        assert!(history[2].content.starts_with("Error: "));
        assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));
        assert!(history[3].content.contains("not valid JSON"));
        assert_eq!(history[3].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let (client, probe) = mcp(FakeServer::new().with_tool("lookup", "", "42")).await;
        let gateway = ScriptedGateway::always(Message::assistant_with_calls(
            "",
            vec![call("again", "lookup", "{}")],
        ));
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::with_max_rounds(3))
            .await
            .unwrap();

        let err = agent.run_turn("loop forever", &NoOpCallback).await.unwrap_err();

        assert!(matches!(err, Error::RoundLimitExceeded(3)));
        assert_eq!(gateway.requests().len(), 3);
        assert_eq!(probe.tool_calls().len(), 3);
        // user + 3 x (assistant-with-call, tool)
        assert_eq!(agent.conversation().len(), 7);
        assert_eq!(agent.state(), LoopState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_gateway_error_preserves_history() {
        let (client, _probe) = mcp(FakeServer::new()).await;
        let gateway = ScriptedGateway::new(vec![
            Err(Error::Gateway("endpoint down".into())),
            Ok(Message::assistant("back online")),
        ]);
        let mut agent = Agent::new(&gateway, &client, vec![], Conversation::new(), LoopConfig::default());

        let err = agent.run_turn("hello", &NoOpCallback).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
        assert_eq!(agent.conversation().len(), 1);
        assert_eq!(agent.state(), LoopState::AwaitingUserInput);

        let out = agent.run_turn("hello again", &NoOpCallback).await.unwrap();
        assert_eq!(out.response, "back online");
        assert_eq!(agent.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_lost_session_aborts_turn() {
        let (client, _probe) = mcp(FakeServer::new().with_tool("lookup", "", "42")).await;
        let gateway = ScriptedGateway::new(vec![Ok(Message::assistant_with_calls(
            "",
            vec![call("c1", "lookup", "{}")],
        ))]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::default())
            .await
            .unwrap();
        client.disconnect().await.unwrap();

        let err = agent.run_turn("lookup", &NoOpCallback).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_startup_with_server_lacking_prompts() {
        let (client, _probe) = mcp(FakeServer::new().with_tool("fetch", "Fetch a URL", "<html>")).await;

        assert!(client.list_prompts().await.unwrap().is_empty());
        assert!(client.list_resources().await.unwrap().is_empty());

        let gateway = ScriptedGateway::new(vec![Ok(Message::assistant("ready"))]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::default())
            .await
            .unwrap();
        assert_eq!(agent.tools().len(), 1);
        assert_eq!(agent.run_turn("hi", &NoOpCallback).await.unwrap().response, "ready");
    }

    #[tokio::test]
    async fn test_callback_sees_tool_activity() {
        struct Recorder(Mutex<Vec<String>>);

        #[async_trait]
        impl LoopCallback for Recorder {
            async fn on_round_start(&self, round: u32) {
                self.0.lock().unwrap().push(format!("round {}", round));
            }
            async fn on_tool_call(&self, tool_name: &str, _arguments: &serde_json::Value) {
                self.0.lock().unwrap().push(format!("call {}", tool_name));
            }
            async fn on_tool_executed(&self, tool_name: &str, observation: &ToolObservation) {
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("done {} {} {}", tool_name, observation.call_id, observation.success));
            }
        }

        let (client, _probe) = mcp(FakeServer::new().with_tool("lookup", "", "42")).await;
        let gateway = ScriptedGateway::new(vec![
            Ok(Message::assistant_with_calls("", vec![call("c1", "lookup", "{}")])),
            Ok(Message::assistant("42")),
        ]);
        let mut agent = Agent::discover(&gateway, &client, Conversation::new(), LoopConfig::unbounded())
            .await
            .unwrap();
        let recorder = Recorder(Mutex::new(Vec::new()));

        agent.run_turn("q", &recorder).await.unwrap();

        assert_eq!(
            recorder.0.into_inner().unwrap(),
            vec!["round 1", "call lookup", "done lookup c1 true", "round 2"]
        );
    }
}
