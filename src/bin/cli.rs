//! mcpagent CLI
//!
//! Interactive console that chats with a model using the tools of an MCP
//! server, plus an `inspect` command that only lists what the server offers.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{theme::ColorfulTheme, Input};
use mcpagent::agent::{
    prompts, Agent, ChatCompletionClient, Conversation, LoopCallback, LoopConfig, ToolObservation,
};
use mcpagent::config::{Config, LogConfig, McpServerConfig};
use mcpagent::mcp::{bridge, McpClient, McpTool};
use mcpagent::{Error, Result, VERSION};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mcpagent",
    version = VERSION,
    about = "Chat with a model that can call the tools of an MCP server",
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Model invocations allowed per turn (0 = unlimited)
    #[arg(long, global = true)]
    max_rounds: Option<u32>,

    /// Connect to a streamable HTTP MCP server instead of the configured one
    #[arg(long, global = true, conflicts_with = "docker_image")]
    server_url: Option<String>,

    /// Run this Docker image as a stdio MCP server
    #[arg(long, global = true)]
    docker_image: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Connect, list tools, resources and prompts, then exit
    Inspect,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Configuration error:").red().bold(), e);
            std::process::exit(2);
        }
    };
    init_logging(&config.log);

    let outcome = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat(config).await,
        Commands::Inspect => inspect(config).await,
    };

    if let Err(e) = outcome {
        error!("{}", e);
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

/// Load config and apply command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(max_rounds) = cli.max_rounds {
        config.agent.max_rounds = max_rounds;
    }
    if let Some(ref url) = cli.server_url {
        config.mcp.server = McpServerConfig::Http { url: url.clone() };
    }
    if let Some(ref image) = cli.docker_image {
        let runner = match config.mcp.server {
            McpServerConfig::Docker { ref runner, .. } => runner.clone(),
            _ => "docker".to_string(),
        };
        config.mcp.server = McpServerConfig::Docker {
            image: image.clone(),
            runner,
        };
    }

    Ok(config)
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so they never interleave with the conversation
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

/// `exit` in any letter case ends the session
fn is_exit_command(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("exit")
}

// ============================================================================
// Server listing
// ============================================================================

/// Print the tools, resources and prompts the server offers
async fn print_server_overview(client: &McpClient) -> Result<Vec<McpTool>> {
    let tools = client.list_tools().await?;
    println!("\n{} ({})", style("Tools").cyan().bold(), tools.len());
    for tool in &tools {
        match tool.description.as_deref() {
            Some(desc) if !desc.is_empty() => {
                println!("   {} - {}", style(&tool.name).yellow(), desc)
            }
            _ => println!("   {}", style(&tool.name).yellow()),
        }
    }

    let resources = client.probe_resources().await?;
    if resources.is_supported() {
        let resources = resources.into_items();
        println!("\n{} ({})", style("Resources").cyan().bold(), resources.len());
        for resource in &resources {
            println!("   {} {}", style(&resource.uri).yellow(), resource.name);
        }
    } else {
        println!("\n{}", style("Resources: not supported by this server").dim());
    }

    let prompts = client.probe_prompts().await?;
    if prompts.is_supported() {
        let prompts = prompts.into_items();
        println!("\n{} ({})", style("Prompts").cyan().bold(), prompts.len());
        for prompt in &prompts {
            println!("   {}", style(&prompt.name).yellow());
            match client.get_prompt(&prompt.name, None).await {
                Ok(rendered) => {
                    for line in rendered.lines() {
                        println!("      {}", style(line).dim());
                    }
                }
                Err(e) => {
                    warn!("Could not render prompt {}: {}", prompt.name, e);
                    println!("      {}", style(format!("(unavailable: {})", e)).dim());
                }
            }
        }
    } else {
        println!("\n{}", style("Prompts: not supported by this server").dim());
    }

    println!();
    Ok(tools)
}

async fn inspect(config: Config) -> Result<()> {
    let client = McpClient::connect(&config.mcp).await?;
    let listed = print_server_overview(&client).await.map(|_| ());
    let closed = client.disconnect().await;
    listed.and(closed)
}

// ============================================================================
// Interactive chat
// ============================================================================

/// Prints tool activity as the loop runs
struct ConsoleCallback;

#[async_trait]
impl LoopCallback for ConsoleCallback {
    async fn on_tool_call(&self, tool_name: &str, arguments: &serde_json::Value) {
        println!(
            "   {} {} {}",
            style("→").cyan(),
            style(tool_name).yellow(),
            style(arguments).dim()
        );
    }

    async fn on_tool_executed(&self, _tool_name: &str, observation: &ToolObservation) {
        let mark = if observation.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("   {} {}ms", mark, observation.duration_ms);
    }
}

async fn chat(config: Config) -> Result<()> {
    config.validate()?;

    let gateway = ChatCompletionClient::new(&config.completion)?;
    let client = McpClient::connect(&config.mcp).await?;

    let outcome = run_session(&config, &gateway, &client).await;

    // Disconnect no matter how the session ended
    if let Err(e) = client.disconnect().await {
        warn!("Error while disconnecting from MCP server: {}", e);
    }
    println!("\n{} Goodbye!\n", style("👋").bold());
    outcome
}

async fn run_session(config: &Config, gateway: &ChatCompletionClient, client: &McpClient) -> Result<()> {
    let tools = bridge::tool_definitions(&print_server_overview(client).await?);
    let system_prompt = prompts::system_prompt(config.agent.system_prompt.as_deref());
    let conversation = Conversation::new().with_system_prompt(system_prompt);
    let loop_config = LoopConfig {
        max_rounds: config.agent.round_limit(),
    };
    let mut agent = Agent::new(gateway, client, tools, conversation, loop_config);

    info!(
        "Chat session started: server={}, model endpoint={}",
        config.mcp.server.label(),
        gateway.url()
    );
    println!(
        "   {} Type a message, or {} to quit.\n",
        style("✓").green(),
        style("exit").yellow()
    );

    loop {
        let user_input: String = Input::with_theme(&theme())
            .with_prompt(style("You").green().bold().to_string())
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::InvalidInput(format!("Input error: {}", e)))?;

        let input = user_input.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            break;
        }

        match agent.run_turn(input, &ConsoleCallback).await {
            Ok(output) => {
                let response = if output.response.is_empty() {
                    "(empty response)"
                } else {
                    output.response.as_str()
                };
                println!("\n{} {}\n", style("Assistant:").cyan().bold(), response);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                if e.is_turn_recoverable() {
                    warn!("Turn failed: {}", e);
                } else {
                    error!("Turn failed: {}", e);
                }
                println!("\n{} {}\n", style("⚠").yellow(), e);
            }
        }
    }

    Ok(())
}
