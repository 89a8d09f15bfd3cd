//! Error types for soulbond-engine.
//!
//! Gameplay preconditions are not errors: they come back as typed replies
//! and notices. These variants cover configuration and persistence only.

use thiserror::Error;

/// Errors raised by configuration loading and state persistence.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration parsed but holds values the engine cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
