use crate::domain::session::FlowState;
use thiserror::Error;

/// Failures talking to the coordination backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No origin or credential could be resolved; the caller should no-op this cycle.
    #[error("backend not ready: {0}")]
    NotReady(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("backend worker is no longer running")]
    WorkerGone,
}

/// Failures reported by the reader SDK.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    #[error("operation canceled")]
    Canceled,
    #[error("no reader connected")]
    NotConnected,
    #[error("{message}")]
    Failed { message: String },
}

impl SdkError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("connection token unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("unexpected step {step} while in state {state:?}")]
    UnexpectedStep { state: FlowState, step: &'static str },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("{key} must be greater than zero")]
    NonPositive { key: &'static str },
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("orchestrator has stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
