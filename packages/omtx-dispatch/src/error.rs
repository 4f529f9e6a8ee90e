use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("lane `{0}` is at capacity")]
    LaneAtCapacity(&'static str),

    #[error("failed to sign OIDC identity token: {0}")]
    TokenSigning(#[from] jsonwebtoken::errors::Error),

    #[error("worker endpoint rejected the task: {0}")]
    WorkerRejected(String),

    #[error("request to worker endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
