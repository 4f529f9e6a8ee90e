use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no active reservation found for job `{0}`")]
    NoActiveReservation(String),
}

pub type Result<T> = std::result::Result<T, QuotaError>;
