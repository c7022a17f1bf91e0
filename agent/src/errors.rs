//! Error types for the fleet agent

use thiserror::Error;

/// Main error type for the fleet agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The cloud answered with a non-success status
    #[error("Channel error ({status}): {message}")]
    ChannelError { status: u16, message: String },

    /// The conditional fetch matched the cached entity tag
    #[error("Not modified")]
    NotModified,

    /// A container runtime command failed
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Image pull timed out: {0}")]
    PullTimeout(String),

    /// The runtime binary or daemon cannot be reached
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Device not activated: {0}")]
    DeviceNotActivated(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::IoError(_)
            | AgentError::HttpError(_)
            | AgentError::RuntimeError(_)
            | AgentError::PullTimeout(_)
            | AgentError::RuntimeUnavailable(_) => true,
            AgentError::ChannelError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
