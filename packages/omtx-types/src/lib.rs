//! Shared data model for the prediction job-orchestration service.
//!
//! Every other crate in the workspace depends on this one for the wire/
//! storage shape of a job, a batch, and a user's quota. Nothing here talks
//! to a database, an object store, or a queue — it is pure data plus the
//! invariants that apply to it.

pub mod batch;
pub mod error;
pub mod job;
pub mod paths;
pub mod quota;

pub use batch::BatchProgress;
pub use error::{ApiError, ErrorKind};
pub use job::{JobRecord, JobStatus, JobType, OutputData};
pub use quota::{ResourceEstimate, ResourceKind, UserQuota, UserTier};

/// Current major schema version written by this crate. Readers reject
/// records whose `schema_version` major component is greater than this.
pub const SCHEMA_VERSION: u32 = 1;
