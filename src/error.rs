//! Error types for Mindscope

use thiserror::Error;

/// Errors that can occur during collection, registration and analysis
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Engine validation failed: {0}")]
    InvalidEngine(String),

    #[error("Engine not registered: {0}")]
    EngineNotFound(String),

    #[error("Integrated analysis engine not available: {0}")]
    MissingIntegratedEngine(String),

    #[error("Personal info is required to run the analysis pipeline")]
    MissingPersonalInfo,

    #[error("Engine {engine_id} failed: {message}")]
    EngineFailed { engine_id: String, message: String },

    #[error("Engine {engine_id} timed out after {timeout_ms} ms")]
    EngineTimeout { engine_id: String, timeout_ms: u64 },

    #[error("Engine {engine_id} rejected input: {reason}")]
    InvalidInput { engine_id: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Metrics source error: {0}")]
    MetricsSource(String),

    #[error("Collector error: {0}")]
    Collector(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ComputeError {
    /// Build an engine failure for `engine_id`
    pub fn engine(engine_id: impl Into<String>, message: impl Into<String>) -> Self {
        ComputeError::EngineFailed {
            engine_id: engine_id.into(),
            message: message.into(),
        }
    }
}
