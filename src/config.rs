//! Configuration management for mcpagent
//!
//! Layered precedence: built-in defaults < TOML config file < environment
//! variables (a `.env` file is loaded first). Command-line flags are applied
//! by the binary on top of the result.

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the API key is presented to the completion endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    /// `Api-Key: <key>` header
    #[default]
    ApiKey,
    /// `Authorization: Bearer <key>` header
    Bearer,
}

impl std::str::FromStr for AuthStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "api-key" | "apikey" | "api_key" => Ok(AuthStyle::ApiKey),
            "bearer" => Ok(AuthStyle::Bearer),
            _ => Err(Error::Config(format!(
                "Invalid completion auth style: {}. Valid options: api-key, bearer",
                s
            ))),
        }
    }
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

/// Completion endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// API key
    #[serde(default = "default_secret")]
    pub api_key: SecretString,
    /// Base URL of the endpoint
    #[serde(default)]
    pub endpoint: String,
    /// Deployment (model) name
    #[serde(default = "default_deployment")]
    pub deployment: String,
    /// Optional `api-version` query parameter
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub auth: AuthStyle,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Cap on generated tokens per completion
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_completion_timeout")]
    pub timeout: Duration,
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_completion_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            api_key: default_secret(),
            endpoint: String::new(),
            deployment: default_deployment(),
            api_version: None,
            auth: AuthStyle::default(),
            temperature: None,
            max_tokens: None,
            timeout: default_completion_timeout(),
        }
    }
}

impl CompletionConfig {
    /// Full chat-completions URL for the configured deployment
    pub fn completions_url(&self) -> String {
        let mut url = format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.deployment
        );
        if let Some(ref version) = self.api_version {
            url.push_str("?api-version=");
            url.push_str(version);
        }
        url
    }
}

/// Which MCP server to talk to
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpServerConfig {
    /// Not configured
    #[default]
    None,
    /// `<runner> run --rm -i <image>` over stdio
    Docker {
        image: String,
        #[serde(default = "default_runner")]
        runner: String,
    },
    /// Arbitrary command over stdio
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Remote server over streamable HTTP
    Http { url: String },
}

fn default_runner() -> String {
    "docker".to_string()
}

impl McpServerConfig {
    /// Short label used in logs
    pub fn label(&self) -> String {
        match self {
            McpServerConfig::None => "none".to_string(),
            McpServerConfig::Docker { image, .. } => image.clone(),
            McpServerConfig::Command { program, .. } => program.clone(),
            McpServerConfig::Http { url } => url.clone(),
        }
    }

    /// Build from a whitespace-separated command line
    pub fn command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(McpServerConfig::Command {
            program,
            args: parts.collect(),
        })
    }
}

/// MCP connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub server: McpServerConfig,
    /// Upper bound for a single MCP request
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for McpConfig {
    fn default() -> Self {
        McpConfig {
            server: McpServerConfig::None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Orchestration loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Model/tool rounds allowed per user turn; 0 disables the limit
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Replaces the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_rounds() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_rounds: default_max_rounds(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// `None` when rounds are unbounded
    pub fn round_limit(&self) -> Option<u32> {
        (self.max_rounds > 0).then_some(self.max_rounds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// `<config dir>/mcpagent/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(crate::NAME).join("config.toml"))
}

impl Config {
    /// Load the config file (explicit path, or the default one if present),
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML config {}: {}", path.display(), e)))
    }

    /// Overlay values from `lookup` (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("DIAL_API_KEY") {
            self.completion.api_key = SecretString::from(key);
        }
        if let Some(endpoint) = lookup("DIAL_ENDPOINT") {
            self.completion.endpoint = endpoint;
        }
        if let Some(deployment) = lookup("DIAL_DEPLOYMENT") {
            self.completion.deployment = deployment;
        }
        if let Some(version) = lookup("DIAL_API_VERSION") {
            self.completion.api_version = Some(version);
        }
        if let Some(tokens) = lookup("DIAL_MAX_TOKENS") {
            self.completion.max_tokens = Some(tokens.parse().map_err(|e| {
                Error::Config(format!("Invalid DIAL_MAX_TOKENS '{}': {}", tokens, e))
            })?);
        }
        if let Some(auth) = lookup("COMPLETION_AUTH") {
            self.completion.auth = auth.parse()?;
        }

        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.mcp.server = McpServerConfig::Http { url };
        } else if let Some(image) = lookup("MCP_DOCKER_IMAGE") {
            self.mcp.server = McpServerConfig::Docker {
                image,
                runner: lookup("MCP_DOCKER_RUNNER").unwrap_or_else(default_runner),
            };
        } else if let Some(server) = lookup("MCP_COMMAND").and_then(|c| McpServerConfig::command_line(&c)) {
            self.mcp.server = server;
        }
        if let Some(timeout) = lookup("MCP_REQUEST_TIMEOUT") {
            self.mcp.request_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| Error::Config(format!("Invalid MCP_REQUEST_TIMEOUT '{}': {}", timeout, e)))?;
        }

        if let Some(rounds) = lookup("AGENT_MAX_ROUNDS") {
            self.agent.max_rounds = rounds
                .parse()
                .map_err(|e| Error::Config(format!("Invalid AGENT_MAX_ROUNDS '{}': {}", rounds, e)))?;
        }
        if let Some(prompt) = lookup("AGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(prompt);
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.log.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.log.format = format;
        }

        Ok(())
    }

    /// Validate that all required configuration is present
    pub fn validate(&self) -> Result<()> {
        if self.completion.api_key.expose_secret().is_empty() {
            return Err(Error::Config("DIAL_API_KEY is required".to_string()));
        }
        if self.completion.endpoint.is_empty() {
            return Err(Error::Config("DIAL_ENDPOINT is required".to_string()));
        }
        url::Url::parse(&self.completion.endpoint).map_err(|e| {
            Error::Config(format!("Invalid completion endpoint '{}': {}", self.completion.endpoint, e))
        })?;
        if self.completion.deployment.is_empty() {
            return Err(Error::Config("DIAL_DEPLOYMENT must not be empty".to_string()));
        }

        match self.mcp.server {
            McpServerConfig::None => {
                return Err(Error::Config(
                    "An MCP server is required: set MCP_DOCKER_IMAGE, MCP_SERVER_URL or MCP_COMMAND"
                        .to_string(),
                ));
            }
            McpServerConfig::Http { ref url } => {
                url::Url::parse(url)
                    .map_err(|e| Error::Config(format!("Invalid MCP server URL '{}': {}", url, e)))?;
            }
            McpServerConfig::Docker { ref image, .. } if image.is_empty() => {
                return Err(Error::Config("MCP docker image must not be empty".to_string()));
            }
            _ => {}
        }

        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(Error::Config(format!(
                "Invalid log format: {}. Valid options: pretty, json",
                self.log.format
            )));
        }
        Ok(())
    }
}
