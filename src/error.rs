use std::path::PathBuf;

/// Errors from the model provider layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not reachable at {url}: {message}")]
    Unavailable { url: String, message: String },

    #[error("Model '{model}' not available: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("Chat request failed: {0}")]
    Request(String),

    #[error("Response stream failed: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether a retry wrapper may reasonably re-issue the request.
    /// Connection-level failures and throttling are transient; a missing
    /// model or a rejected request is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Unavailable { .. } => true,
            ProviderError::ModelNotAvailable { .. } => false,
            ProviderError::Request(msg) | ProviderError::Stream(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timed out")
                    || msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("429")
                    || msg.contains("rate limit")
                    || msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("overloaded")
            }
        }
    }
}

/// Refusals from the workspace write guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    #[error("refusing to write outside the workspace: `{path}` is not under `{workspace}`")]
    WriteOutsideWorkspace { path: PathBuf, workspace: PathBuf },
}

/// Errors from shell command execution. A timed-out command is not an
/// error at this level; it reports as a result with `timed_out` set.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("could not spawn shell: {0}")]
    SpawnFailed(String),

    #[error("shell process failed: {0}")]
    ProcessFailed(String),
}

/// Errors from the agent-definition registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse agent definition at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Agent definition at {path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: String },

    #[error("Failed to serialize agent definition '{name}': {message}")]
    SerializeError { name: String, message: String },

    #[error("No agent named '{name}' in {scope} scope")]
    NotFound { name: String, scope: String },
}

/// Errors raised at delegation time, before a sub-agent exists.
/// Failures *during* execution are captured in the result instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Unknown agent '{0}'")]
    AgentNotFound(String),

    #[error("Agent '{0}' is disabled")]
    AgentDisabled(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
