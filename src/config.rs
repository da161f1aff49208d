use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agents::orchestrator::OrchestratorSettings;
use crate::agents::specialist::SpecialistSettings;
use crate::cli::{Cli, MemoryBackend};
use crate::error::PilotError;
use crate::handoff::MAX_HANDOFF_DEPTH;
use crate::llm::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::parallel::MAX_PARALLEL_AGENTS;
use crate::session::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PilotConfig {
    pub orchestrator: OrchestratorOptions,
    pub planning: PlanningOptions,
    pub research: ResearchOptions,
    pub reporting: ReportingOptions,
    pub global: GlobalOptions,
    pub provider: ProviderOptions,
    pub memory: MemoryOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorOptions {
    pub custom_system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub enable_parallel_execution: bool,
    pub max_handoff_depth: u32,
    pub max_parallel_agents: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            custom_system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            enable_parallel_execution: true,
            max_handoff_depth: MAX_HANDOFF_DEPTH,
            max_parallel_agents: MAX_PARALLEL_AGENTS,
        }
    }
}

impl OrchestratorOptions {
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: self.custom_system_prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            enable_parallel_execution: self.enable_parallel_execution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanningOptions {
    pub enabled: bool,
    pub custom_system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// TShirt, Fibonacci or Hours.
    pub estimation_scale: String,
}

impl Default for PlanningOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_system_prompt: None,
            temperature: None,
            max_tokens: None,
            estimation_scale: "TShirt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResearchOptions {
    pub enabled: bool,
    pub custom_system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_search_results: usize,
    pub enable_web_search: bool,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_system_prompt: None,
            temperature: None,
            max_tokens: None,
            max_search_results: 10,
            enable_web_search: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportingOptions {
    pub enabled: bool,
    pub custom_system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub default_format: String,
}

impl Default for ReportingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_system_prompt: None,
            temperature: None,
            max_tokens: None,
            default_format: "Markdown".to_string(),
        }
    }
}

macro_rules! specialist_settings {
    ($($options:ty),+) => {
        $(impl $options {
            pub fn settings(&self) -> SpecialistSettings {
                SpecialistSettings {
                    system_prompt: self.custom_system_prompt.clone(),
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                }
            }
        })+
    };
}

specialist_settings!(PlanningOptions, ResearchOptions, ReportingOptions);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalOptions {
    pub timeout_ms: u64,
    pub enable_activity_logging: bool,
    pub max_conversation_history: usize,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            enable_activity_logging: true,
            max_conversation_history: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderOptions {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryOptions {
    pub backend: MemoryBackend,
    pub path: String,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::File,
            path: ".pilot/memory.json".to_string(),
        }
    }
}

pub fn load_config(config_path: &str) -> Result<PilotConfig> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(PilotConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at '{}'", path.display()))?;
    let config = toml::from_str::<PilotConfig>(&content).with_context(|| {
        format!(
            "invalid configuration in '{}'. Check section and field names.",
            path.display()
        )
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Command-line values win over the file.
pub fn apply_cli_overrides(mut config: PilotConfig, cli: &Cli) -> PilotConfig {
    if let Some(endpoint) = &cli.endpoint {
        config.provider.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(backend) = cli.memory_backend {
        config.memory.backend = backend;
    }
    if let Some(path) = &cli.memory_path {
        config.memory.path = path.clone();
    }
    config
}

pub fn validate_config(config: &PilotConfig) -> Result<()> {
    check_config(config).map_err(|message| PilotError::Config(message.to_string()).into())
}

fn check_config(config: &PilotConfig) -> std::result::Result<(), &'static str> {
    if config.orchestrator.max_parallel_agents == 0 {
        return Err("[orchestrator].max_parallel_agents must be at least 1");
    }
    if config.provider.endpoint.trim().is_empty() {
        return Err("[provider].endpoint cannot be empty");
    }
    if config.provider.model.trim().is_empty() {
        return Err("[provider].model cannot be empty");
    }
    if config.memory.backend == MemoryBackend::File && config.memory.path.trim().is_empty() {
        return Err("[memory].path cannot be empty for the file backend");
    }
    let temperatures = [
        Some(config.orchestrator.temperature),
        config.planning.temperature,
        config.research.temperature,
        config.reporting.temperature,
    ];
    if temperatures
        .into_iter()
        .flatten()
        .any(|temperature| !(0.0..=2.0).contains(&temperature))
    {
        return Err("temperature values must be between 0.0 and 2.0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config("/definitely/not/here/config.toml").expect("load should succeed");
        assert_eq!(config, PilotConfig::default());
        assert_eq!(config.orchestrator.max_handoff_depth, 5);
        assert_eq!(config.orchestrator.max_parallel_agents, 3);
        assert_eq!(config.global.max_conversation_history, 10);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[orchestrator]
enable_parallel_execution = false

[planning]
estimation_scale = "Fibonacci"
temperature = 0.2

[memory]
backend = "memory"
"#,
        )
        .expect("fixture should be written");

        let config = load_config(path.to_str().expect("utf-8 path")).expect("load should succeed");
        assert!(!config.orchestrator.enable_parallel_execution);
        assert_eq!(config.planning.estimation_scale, "Fibonacci");
        assert_eq!(config.planning.settings().temperature, Some(0.2));
        assert_eq!(config.memory.backend, MemoryBackend::Memory);
        assert_eq!(config.research.max_search_results, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[orchestrator]\nmax_depth = 9\n").expect("fixture should be written");

        let err = load_config(path.to_str().expect("utf-8 path")).expect_err("load should fail");
        assert!(format!("{err:#}").contains("invalid configuration"));
    }

    #[test]
    fn zero_parallelism_is_invalid() {
        let mut config = PilotConfig::default();
        config.orchestrator.max_parallel_agents = 0;
        let err = validate_config(&config).expect_err("validation should fail");
        assert!(matches!(
            err.downcast_ref::<PilotError>(),
            Some(PilotError::Config(_))
        ));
    }
}
