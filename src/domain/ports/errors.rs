use thiserror::Error;

/// Handler store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}
