use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use project_pilot::activity::ActivityLogger;
use project_pilot::agents::ChunkKind;
use project_pilot::cli::{Cli, Commands, MemoryBackend, MemoryCommands, StateCommands, command_label, join_prompt};
use project_pilot::config::{MemoryOptions, apply_cli_overrides, load_config, validate_config};
use project_pilot::context::Message;
use project_pilot::error::{categorize_error, format_cli_error};
use project_pilot::memory::{FileMemoryStore, InMemoryStore, MemoryStore};
use project_pilot::provider::{OfflineCompletion, resolve_completion_service};
use project_pilot::service::PilotRuntime;
use project_pilot::session::ContextRequest;
use project_pilot::state::AgentStateManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let config = apply_cli_overrides(load_config(&cli.config_path)?, &cli);
    validate_config(&config)?;

    let Some(command) = cli.command.as_ref() else {
        println!("No command given. Run project-pilot --help for usage.");
        return Ok(());
    };
    tracing::debug!(command = command_label(command), "running command");

    let memory = open_memory_store(&config.memory)?;
    let request = ContextRequest::new(cli.session_id.clone())
        .with_user(cli.user_id.clone())
        .with_project(cli.project_id.clone());

    match command {
        Commands::Ask { prompt } => {
            let prompt = require_prompt(prompt)?;
            let completion = resolve_completion_service(&config)?;
            let runtime = PilotRuntime::build(&config, completion, memory, None);
            let cancel = cancel_on_ctrl_c();
            let response = runtime.ask(&request, &prompt, &cancel).await?;
            tracing::info!(
                agent = %response.from_agent,
                duration_ms = response.duration.as_millis() as u64,
                "answered"
            );
            println!("{}", response.content);
        }
        Commands::Stream { prompt } => {
            let prompt = require_prompt(prompt)?;
            let completion = resolve_completion_service(&config)?;
            let runtime = PilotRuntime::build(&config, completion, memory, None);
            let cancel = cancel_on_ctrl_c();
            stream_prompt(&runtime, &request, &prompt, &cancel).await?;
        }
        Commands::Agents => {
            let runtime = PilotRuntime::build(&config, Arc::new(OfflineCompletion), memory, None);
            for agent in runtime.registry.all() {
                println!("{:<14} {:<13} {}", agent.name(), agent.kind(), agent.description());
            }
        }
        Commands::History => {
            let history = ActivityLogger::new(memory)
                .communication_history(&cli.session_id)
                .await?;
            if history.is_empty() {
                println!("No agent communication recorded for session '{}'.", cli.session_id);
            }
            for item in history {
                println!(
                    "{}  {} -> {} ({})",
                    item.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    item.from_agent,
                    item.to_agent,
                    item.kind.as_str()
                );
            }
        }
        Commands::State { command } => match command {
            StateCommands::Clear => {
                AgentStateManager::new(memory)
                    .clear_state(&cli.session_id)
                    .await?;
                println!("Cleared agent state for session '{}'.", cli.session_id);
            }
        },
        Commands::Memory { command } => match command {
            MemoryCommands::Search { query, limit } => {
                let query = require_prompt(query)?;
                let entries = memory
                    .search(&query, cli.project_id.as_deref(), *limit)
                    .await
                    .context("memory search failed")?;
                if entries.is_empty() {
                    println!("No entries match '{query}'.");
                }
                for entry in entries {
                    let first_line = entry.content.lines().next().unwrap_or_default();
                    println!(
                        "{}  {:<10} {}  {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.kind,
                        entry.session_id,
                        first_line
                    );
                }
            }
        },
    }

    Ok(())
}

async fn stream_prompt(
    runtime: &PilotRuntime,
    request: &ContextRequest,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let context = runtime.context.load_context(request).await?;
    let message = Message::user(prompt);
    runtime
        .context
        .record_message(&request.session_id, &message)
        .await?;

    let mut stream = runtime
        .service
        .process_message_stream(&message, &context, cancel)
        .await?;
    let mut answer = String::new();
    let mut answered_by = String::new();
    let mut stdout = io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match chunk.kind {
            ChunkKind::Thinking => eprintln!("· {}", chunk.content.trim_end()),
            ChunkKind::Handoff => eprintln!("→ {}", chunk.content),
            ChunkKind::ToolCall => eprintln!("⚙ {}", chunk.content.trim_end()),
            ChunkKind::Content => {
                answer.push_str(&chunk.content);
                answered_by = chunk.from_agent;
                write!(stdout, "{}", chunk.content)?;
                stdout.flush()?;
            }
        }
    }
    writeln!(stdout)?;

    if cancel.is_cancelled() {
        eprintln!("(cancelled)");
        return Ok(());
    }
    let reply = Message::agent(answer).from(answered_by);
    runtime
        .context
        .record_message(&request.session_id, &reply)
        .await?;
    Ok(())
}

fn require_prompt(words: &[String]) -> Result<String> {
    let prompt = join_prompt(words);
    if prompt.is_empty() {
        anyhow::bail!("prompt cannot be empty");
    }
    Ok(prompt)
}

fn open_memory_store(options: &MemoryOptions) -> Result<Arc<dyn MemoryStore>> {
    match options.backend {
        MemoryBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        MemoryBackend::File => {
            let store = FileMemoryStore::open(&options.path)
                .with_context(|| format!("failed to open memory store at '{}'", options.path))?;
            Ok(Arc::new(store))
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling request");
            trigger.cancel();
        }
    });
    cancel
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
