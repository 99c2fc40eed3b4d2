//! Chat completion gateway
//!
//! [`CompletionGateway`] is the seam between the orchestration loop and the
//! remote model; [`ChatCompletionClient`] is the HTTP implementation.

use crate::agent::types::*;
use crate::config::{AuthStyle, CompletionConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

/// Something that turns a conversation plus tool descriptors into the
/// model's next assistant message.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Returns the assistant message: either a final answer or one with
    /// pending tool calls. Failures are [`Error::Gateway`].
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message>;
}

/// Function-calling chat completion client
#[derive(Clone)]
pub struct ChatCompletionClient {
    /// HTTP client
    client: Client,
    url: String,
    options: GenerationOptions,
}

impl ChatCompletionClient {
    /// Create a new client
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        let (name, value) = match config.auth {
            AuthStyle::ApiKey => (
                header::HeaderName::from_static("api-key"),
                config.api_key.expose_secret().to_string(),
            ),
            AuthStyle::Bearer => (
                header::AUTHORIZATION,
                format!("Bearer {}", config.api_key.expose_secret()),
            ),
        };
        let mut value = header::HeaderValue::from_str(&value)
            .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(name, value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(ChatCompletionClient {
            client,
            url: config.completions_url(),
            options: GenerationOptions {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        })
    }

    /// Endpoint this client posts to
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        debug!(
            "Sending completion request: messages={}, tools={}",
            request.messages.len(),
            request.tools.as_ref().map_or(0, Vec::len)
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("Completion endpoint unreachable: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let body = response
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|e| Error::Gateway(format!("Malformed completion response: {}", e)))?;

            if let Some(ref usage) = body.usage {
                info!(
                    "Completion response: model={}, tokens={}",
                    body.model, usage.total_tokens
                );
            }

            Ok(body)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Completion endpoint returned {}: {}", status, error_text);

            if status.as_u16() == 401 {
                Err(Error::Gateway("Invalid API key".to_string()))
            } else {
                Err(Error::Gateway(format!("API error ({}): {}", status, error_text)))
            }
        }
    }
}

#[async_trait]
impl CompletionGateway for ChatCompletionClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message> {
        let has_tools = !tools.is_empty();
        let request = ChatCompletionRequest {
            messages: messages.to_vec(),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            tools: has_tools.then(|| tools.to_vec()),
            tool_choice: has_tools.then_some(ToolChoice::Auto),
        };

        let response = self.send_request(&request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Gateway("Completion response contained no choices".to_string()))?;

        debug!(
            "finish_reason={:?}, tool_calls={}",
            choice.finish_reason,
            choice.message.pending_tool_calls().len()
        );

        if choice.message.role != Role::Assistant {
            return Err(Error::Gateway(format!(
                "Expected an assistant message, got role '{}'",
                choice.message.role
            )));
        }

        Ok(choice.message)
    }
}
