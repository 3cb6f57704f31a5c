//! Error types for the expense assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Parse failure: {0}")]
    Parse(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("State persistence error: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
