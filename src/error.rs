use thiserror::Error;

/// Errors surfaced by the orchestration layer.
///
/// Collaborator failures (`Completion`, `Memory`) carry the collaborator's own
/// error untouched; nothing in this crate retries them.
#[derive(Debug, Error)]
pub enum PilotError {
    #[error("orchestrator agent not registered")]
    OrchestratorMissing,

    #[error("communication failed: {0}")]
    Communication(String),

    #[error("completion service failed: {0:#}")]
    Completion(#[source] anyhow::Error),

    #[error("memory store failed: {0:#}")]
    Memory(#[source] anyhow::Error),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PilotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Memory,
    Routing,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Memory => "MEMORY",
            ErrorCategory::Routing => "ROUTING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Check [provider] endpoint/model in the config file and that the API key variable is set."
            }
            ErrorCategory::Memory => {
                "Check [memory] backend/path in the config file and that the path is writable."
            }
            ErrorCategory::Routing => {
                "Run project-pilot agents to list registered agents and check agent names."
            }
            ErrorCategory::Input => "Run project-pilot --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(pilot) = err.downcast_ref::<PilotError>() {
        return match pilot {
            PilotError::Completion(_) => ErrorCategory::Provider,
            PilotError::Memory(_) | PilotError::Serialization(_) => ErrorCategory::Memory,
            PilotError::OrchestratorMissing | PilotError::Communication(_) => {
                ErrorCategory::Routing
            }
            PilotError::Config(_) => ErrorCategory::Input,
            PilotError::Cancelled => ErrorCategory::Internal,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api key") || msg.contains("api_key") || msg.contains("provider") {
        return ErrorCategory::Provider;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("config")
        || msg.contains("cannot be empty")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("memory") || msg.contains("session") {
        return ErrorCategory::Memory;
    }

    if msg.contains("agent") {
        return ErrorCategory::Routing;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        redact_api_keys(&format!("{err:#}")),
        category.hint()
    )
}

/// Masks `sk-` style keys that providers echo back in errors.
pub fn redact_api_keys(text: &str) -> String {
    text.split(' ')
        .map(|token| {
            if token.starts_with("sk-") && token.len() > 8 {
                "sk-[REDACTED]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
