use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job `{0}` not found")]
    NotFound(String),

    #[error("database backend error: {0}")]
    Backend(String),

    #[error("illegal status transition for job `{job_id}`: {from:?} -> {to:?}")]
    IllegalTransition {
        job_id: String,
        from: omtx_types::job::JobStatus,
        to: omtx_types::job::JobStatus,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("large result offload failed: {0}")]
    Offload(#[from] omtx_storage_gateway::StorageError),
}

pub type Result<T> = std::result::Result<T, JobStoreError>;
