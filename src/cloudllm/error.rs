//! Error types for every layer of the worker.
//!
//! Each layer gets its own hand-rolled enum with manual `Display`/`Error` impls, matching the
//! teacher's style in its tool and orchestration error types rather than pulling in `thiserror`.

use std::error::Error;
use std::fmt;

/// Settings or prompt-template loading failures. Fatal at startup.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The settings file could not be read from disk.
    MissingSettingsFile(String),
    /// The settings file parsed but declared zero LLM configs.
    NoLlmConfigs,
    /// A required prompt file was absent from the prompt directory.
    MissingPrompt(String),
    /// The settings file was present but not valid JSON / violated schema expectations.
    Malformed(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingSettingsFile(path) => {
                write!(f, "settings file not found at {}", path)
            }
            ConfigError::NoLlmConfigs => write!(f, "settings declared zero LLM configs"),
            ConfigError::MissingPrompt(role) => {
                write!(f, "missing required prompt file for role '{}'", role)
            }
            ConfigError::Malformed(msg) => write!(f, "malformed settings: {}", msg),
        }
    }
}

impl Error for ConfigError {}

/// Workspace bootstrap failures (clone, identity configuration, branch checkout).
#[derive(Debug, Clone)]
pub enum WorkspaceError {
    CleanupFailed(String),
    CloneFailed(String),
    IdentityFailed(String),
    BranchFailed(String),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::CleanupFailed(msg) => write!(f, "workspace cleanup failed: {}", msg),
            WorkspaceError::CloneFailed(msg) => write!(f, "repository clone failed: {}", msg),
            WorkspaceError::IdentityFailed(msg) => {
                write!(f, "git identity configuration failed: {}", msg)
            }
            WorkspaceError::BranchFailed(msg) => write!(f, "branch checkout failed: {}", msg),
        }
    }
}

impl Error for WorkspaceError {}

/// LLM provider errors, surfaced only after retry/fallback is exhausted.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// All configured providers were exhausted after rate-limit retries.
    RateLimitExhausted(String),
    /// A non-2xx response was returned and the error did not match a recognized retry case.
    Http { status: u16, body: String },
    /// The request could not be sent or the response could not be read (DNS, TLS, timeout, …).
    Transport(String),
    /// The response body did not parse into the expected shape after a retry.
    MalformedResponse(String),
    /// Every configured LLM config was tried and each failed in turn.
    AllProvidersExhausted,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimitExhausted(model) => {
                write!(f, "rate limited past retry cap for model '{}'", model)
            }
            ProviderError::Http { status, body } => {
                write!(f, "provider returned HTTP {}: {}", status, body)
            }
            ProviderError::Transport(msg) => write!(f, "transport error: {}", msg),
            ProviderError::MalformedResponse(msg) => write!(f, "malformed response: {}", msg),
            ProviderError::AllProvidersExhausted => {
                write!(f, "all configured LLM providers were exhausted")
            }
        }
    }
}

impl Error for ProviderError {}

/// Tool handler failures. Always converted to a text tool-result, never propagated as `Err`.
#[derive(Debug, Clone)]
pub enum ToolError {
    InvalidArguments(String),
    NotFound(String),
    ExecutionFailed(String),
    PathTraversal(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "execution failed: {}", msg),
            ToolError::PathTraversal(path) => write!(f, "path escapes workspace root: {}", path),
        }
    }
}

impl Error for ToolError {}

/// Orchestrator-level terminal failure, wrapping the above plus budget/cancellation cases.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    Config(ConfigError),
    Workspace(WorkspaceError),
    Provider(ProviderError),
    BudgetExceeded,
    Cancelled,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Config(e) => write!(f, "{}", e),
            OrchestratorError::Workspace(e) => write!(f, "{}", e),
            OrchestratorError::Provider(e) => write!(f, "{}", e),
            OrchestratorError::BudgetExceeded => write!(f, "Cost budget exceeded"),
            OrchestratorError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl Error for OrchestratorError {}

impl From<ConfigError> for OrchestratorError {
    fn from(e: ConfigError) -> Self {
        OrchestratorError::Config(e)
    }
}

impl From<WorkspaceError> for OrchestratorError {
    fn from(e: WorkspaceError) -> Self {
        OrchestratorError::Workspace(e)
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(e: ProviderError) -> Self {
        OrchestratorError::Provider(e)
    }
}
