//! Error types for Turnstile operations

use std::time::Duration;

/// Result type for Turnstile operations
pub type Result<T> = std::result::Result<T, TurnstileError>;

/// Error types for the compaction engine
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    /// Turn limits violate `keep_last_n_turns <= context_limit` or `context_limit >= 1`
    #[error(
        "Invalid turn limits: keep_last_n_turns ({keep_last_n_turns}) must not exceed context_limit ({context_limit}), and context_limit must be at least 1"
    )]
    InvalidTurnLimits {
        keep_last_n_turns: usize,
        context_limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Summarizer collaborator failed
    #[error("Summarizer error: {0}")]
    Summarizer(String),

    /// Summarizer collaborator did not answer in time
    #[error("Summarizer timed out after {0:?}")]
    SummarizerTimeout(Duration),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TurnstileError {
    fn from(s: String) -> Self {
        TurnstileError::Other(s)
    }
}

impl From<&str> for TurnstileError {
    fn from(s: &str) -> Self {
        TurnstileError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for TurnstileError {
    fn from(err: anyhow::Error) -> Self {
        TurnstileError::Other(err.to_string())
    }
}
