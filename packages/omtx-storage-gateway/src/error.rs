use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store backend error: {0}")]
    Backend(String),

    #[error("path `{0}` falls outside the permitted storage schema")]
    SchemaViolation(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transaction `{0}` already committed")]
    AlreadyCommitted(String),

    #[error("transaction `{0}` already rolled back")]
    AlreadyRolledBack(String),

    #[error("validation failed for `{key}`: {reason}")]
    ValidationFailed { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
