use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("job store error: {0}")]
    JobStore(#[from] omtx_job_store::JobStoreError),

    #[error("storage gateway error: {0}")]
    Storage(#[from] omtx_storage_gateway::StorageError),

    #[error("csv encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("batch `{0}` has no child results to aggregate")]
    Empty(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
