//! Job records and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::batch::BatchProgress;
use crate::SCHEMA_VERSION;

/// What kind of job a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Individual,
    BatchParent,
    BatchChild,
}

/// Lifecycle status of a job. See [`JobStatus::can_transition_to`] for the
/// allowed edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Parent-only terminal status: some children completed, the rest
    /// failed or were cancelled. Distinct from `Completed`, not an alias.
    PartiallyCompleted,
}

impl JobStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::PartiallyCompleted
        )
    }

    /// Whether moving from `self` to `next` is a legal status transition.
    ///
    /// Transitions only move forward along
    /// `pending -> queued -> running -> {completed, failed, cancelled}`,
    /// with `cancelled` reachable from any non-terminal state and
    /// `partially_completed` reachable only from `running` (a batch
    /// parent discovering its children are done). `queued -> failed` is
    /// also legal on its own: a job that never reaches `running` because
    /// dispatch itself failed still needs a terminal status.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Queued) => true,
            (Pending, Cancelled) => true,
            (Queued, Running) => true,
            (Queued, Failed) => true,
            (Queued, Cancelled) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Cancelled) => true,
            (Running, PartiallyCompleted) => true,
            _ => false,
        }
    }
}

/// Structured failure reason, set when `status == Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

/// Either an inline result summary or a pointer to the full blob in object
/// storage, mirroring the Job Store's large-result offload (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputData {
    Pointer {
        results_in_object_store: bool,
        path: String,
        size_bytes: u64,
    },
    Inline(JsonValue),
}

impl OutputData {
    pub fn is_pointer(&self) -> bool {
        matches!(self, OutputData::Pointer { .. })
    }
}

/// The unit of execution: an individual prediction, a batch parent, or one
/// child of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub task_type: String,
    pub model_name: String,
    pub status: JobStatus,
    pub user_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub input_data: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<OutputData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batch_child_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_progress: Option<BatchProgress>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl JobRecord {
    /// Builds a fresh `pending` job record. Callers fill in batch-specific
    /// fields afterwards for parents/children.
    pub fn new(
        id: String,
        job_type: JobType,
        task_type: impl Into<String>,
        model_name: impl Into<String>,
        user_id: impl Into<String>,
        input_data: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            task_type: task_type.into(),
            model_name: model_name.into(),
            status: JobStatus::Pending,
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            input_data,
            output_data: None,
            batch_parent_id: None,
            batch_index: None,
            batch_child_ids: Vec::new(),
            batch_progress: None,
            dispatch_receipt: None,
            idempotency_key: None,
            error: None,
            metadata: HashMap::new(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Applies a status transition, enforcing monotonicity and stamping
    /// `updated_at`/`completed_at`. Returns `false` (and leaves the record
    /// untouched) on an illegal transition.
    #[must_use]
    pub fn transition_to(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }

    pub fn is_batch_parent(&self) -> bool {
        self.job_type == JobType::BatchParent
    }

    pub fn is_batch_child(&self) -> bool {
        self.job_type == JobType::BatchChild
    }

    /// True iff §3's artifact-existence invariant should hold for this
    /// record: `status == completed && output_data.files_stored`.
    pub fn artifacts_expected(&self) -> bool {
        if self.status != JobStatus::Completed {
            return false;
        }
        match &self.output_data {
            Some(OutputData::Inline(v)) => v
                .get("files_stored")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn legal_transitions_follow_the_happy_path() {
        let mut job = JobRecord::new(
            "job-1".into(),
            JobType::Individual,
            "protein_ligand_binding",
            "boltz2",
            "u1",
            serde_json::json!({}),
        );
        assert!(job.transition_to(JobStatus::Queued));
        assert!(job.transition_to(JobStatus::Running));
        assert!(job.started_at.is_some());
        assert!(job.transition_to(JobStatus::Completed));
        assert!(job.completed_at.is_some());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn terminal_states_never_regress() {
        let mut job = JobRecord::new(
            "job-2".into(),
            JobType::Individual,
            "protein_ligand_binding",
            "boltz2",
            "u1",
            serde_json::json!({}),
        );
        job.transition_to(JobStatus::Queued);
        job.transition_to(JobStatus::Running);
        assert!(job.transition_to(JobStatus::Completed));
        assert!(!job.transition_to(JobStatus::Running));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn queued_can_fail_directly_without_ever_running() {
        let mut job = JobRecord::new(
            "job-4".into(),
            JobType::Individual,
            "protein_ligand_binding",
            "boltz2",
            "u1",
            serde_json::json!({}),
        );
        job.transition_to(JobStatus::Queued);
        assert!(job.transition_to(JobStatus::Failed));
        assert!(job.started_at.is_none());
    }

    #[test]
    fn cancellation_reachable_from_any_non_terminal_state() {
        for start in [JobStatus::Pending, JobStatus::Queued, JobStatus::Running] {
            let mut job = JobRecord::new(
                "job-3".into(),
                JobType::Individual,
                "protein_ligand_binding",
                "boltz2",
                "u1",
                serde_json::json!({}),
            );
            job.status = start;
            assert!(job.transition_to(JobStatus::Cancelled), "{start:?} -> cancelled");
        }
    }
}
