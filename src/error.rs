use thiserror::Error;

use crate::agent::state::NodeKind;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("Claude API rate limited: {0}")]
    ClaudeRateLimited(String),

    #[error("Claude API transient error: {0}")]
    ClaudeTransient(String),

    #[error("Recursion limit of {limit} node invocations exceeded before running {node}")]
    RecursionExceeded { limit: usize, node: NodeKind },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether a Proposer call that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ClaudeRateLimited(_) | AppError::ClaudeTransient(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
