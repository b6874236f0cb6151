//! Error types for Mediagraph

use thiserror::Error;

/// Errors that can occur while building or driving a graph session
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid graph configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid model buffer: {0}")]
    InvalidModel(String),

    #[error("Failed to observe output stream '{stream}': {reason}")]
    StreamRegistration { stream: String, reason: String },

    #[error("Failed to start graph: {0}")]
    EngineStart(String),

    #[error("Engine rejected packet on '{stream}': {reason}")]
    Submission { stream: String, reason: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session has been disposed")]
    SessionDisposed,

    #[error("No graph engine installed")]
    NoEngine,

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// Whether the error happened while constructing a session
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self,
            GraphError::InvalidConfig(_)
                | GraphError::InvalidModel(_)
                | GraphError::StreamRegistration { .. }
                | GraphError::EngineStart(_)
                | GraphError::NoEngine
        )
    }
}
