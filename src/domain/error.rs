use thiserror::Error;

use super::ports::errors::StoreError;

/// Domain-level errors for handler operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid handler: {0}")]
    Validation(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Handler already exists: {0}")]
    HandlerExists(String),

    #[error("Action failed: {0}")]
    Execution(String),

    #[error("Action timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
