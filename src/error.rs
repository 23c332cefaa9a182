use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the ragbus crate
#[derive(Error, Debug)]
pub enum RagbusError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Broker transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// The broker connection dropped while a call was in flight
    #[error("Connection to the broker was lost")]
    ConnectionLost,

    /// An RPC call did not receive a response within its deadline
    #[error("RPC call to '{routing_key}' timed out after {timeout_ms}ms")]
    Timeout { routing_key: String, timeout_ms: u64 },

    /// Request body failed boundary validation
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Vector index errors
    #[error("Vector index error: {0}")]
    Index(String),

    /// HTTP errors talking to a collaborator service
    #[error("HTTP error: {context}: {source}")]
    Http {
        source: reqwest::Error,
        context: String,
    },

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Text generation errors
    #[error("Generation error: {0}")]
    Generation(String),

    /// CSV ingestion errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for ragbus operations
pub type Result<T> = std::result::Result<T, RagbusError>;
