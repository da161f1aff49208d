use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Subcommand)]
pub enum StateCommands {
    #[command(about = "Delete every agent's saved state for the session")]
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommands {
    #[command(about = "Search stored plans, research, and reports by substring")]
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  project-pilot ask \"Break down the billing migration into tasks\"\n\
  project-pilot --project-id atlas stream \"Research queue options and plan the rollout\"\n\
  project-pilot --session-id sprint-12 ask \"What's the status of the sprint?\"\n\
  project-pilot agents\n\
  project-pilot --session-id sprint-12 history\n\
  project-pilot --session-id sprint-12 state clear\n\
  project-pilot memory search milestones --limit 5\n\
\n\
Configuration:\n\
  - Settings are read from --config-path (default .pilot/config.toml); a missing file means defaults.\n\
  - --endpoint/--model/--memory-backend override the file for this invocation.";

#[derive(Debug, Parser)]
#[command(name = "project-pilot")]
#[command(about = "Intent-routed multi-agent assistant for planning, research, and reporting")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "PILOT_CONFIG", default_value = ".pilot/config.toml")]
    pub config_path: String,
    #[arg(long, env = "PILOT_ENDPOINT")]
    pub endpoint: Option<String>,
    #[arg(long, env = "PILOT_MODEL")]
    pub model: Option<String>,
    #[arg(long, env = "PILOT_SESSION_ID", default_value = "default")]
    pub session_id: String,
    #[arg(long, env = "PILOT_USER_ID")]
    pub user_id: Option<String>,
    #[arg(long, env = "PILOT_PROJECT_ID")]
    pub project_id: Option<String>,
    #[arg(long, env = "PILOT_MEMORY_BACKEND", value_enum)]
    pub memory_backend: Option<MemoryBackend>,
    #[arg(long, env = "PILOT_MEMORY_PATH")]
    pub memory_path: Option<String>,
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Route a prompt through the orchestrator and print the final response")]
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    #[command(about = "Route a prompt and print the response as it streams")]
    Stream {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    #[command(about = "List registered agents")]
    Agents,
    #[command(about = "Show agent communication history for the session")]
    History,
    #[command(about = "Manage persisted agent state")]
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    #[command(about = "Query the memory store")]
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

pub fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Ask { .. } => "ask",
        Commands::Stream { .. } => "stream",
        Commands::Agents => "agents",
        Commands::History => "history",
        Commands::State { command } => match command {
            StateCommands::Clear => "state.clear",
        },
        Commands::Memory { command } => match command {
            MemoryCommands::Search { .. } => "memory.search",
        },
    }
}

pub fn join_prompt(words: &[String]) -> String {
    words.join(" ").trim().to_string()
}
