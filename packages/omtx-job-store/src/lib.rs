//! Job and batch record store: a cached facade over a document-database
//! backend, enforcing the status state machine and offloading
//! oversized results to the Storage Gateway.

pub mod backend;
pub mod cache;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use omtx_types::batch::BatchProgress;
use omtx_types::job::{JobError, JobRecord, JobStatus, JobType, OutputData};

pub use backend::{DynamoDbBackend, InMemoryBackend, JobBackend};
pub use cache::JobCache;
pub use error::{JobStoreError, Result};

/// DynamoDB's per-item hard cap. Results above this, serialized, move to
/// object storage and the record holds a pointer instead.
const INLINE_RESULT_BYTES_LIMIT: usize = 380 * 1024;

/// DynamoDB `BatchGetItem`'s page limit.
const BATCH_GET_CHUNK_SIZE: usize = 500;

pub struct JobStore {
    backend: Arc<dyn JobBackend>,
    cache: JobCache,
    storage: Arc<omtx_storage_gateway::StorageGateway>,
}

impl JobStore {
    pub fn new(backend: Arc<dyn JobBackend>, storage: Arc<omtx_storage_gateway::StorageGateway>) -> Self {
        Self {
            backend,
            cache: JobCache::new(Duration::from_secs(120)),
            storage,
        }
    }

    pub async fn create(&self, record: JobRecord) -> Result<()> {
        self.backend.put(&record).await?;
        self.cache.put(record);
        Ok(())
    }

    /// Creates a batch parent and all of its children in one call, so a
    /// caller never observes a parent with a partial child set. Children
    /// are written first and the parent last — a caller that observes the
    /// parent record also knows every id in its `batch_child_ids` already
    /// exists. If a child insert fails partway through, every child
    /// already written is tombstoned so the call fails cleanly rather
    /// than leaving orphaned child records with no parent.
    pub async fn create_batch(&self, parent: JobRecord, children: Vec<JobRecord>) -> Result<()> {
        let mut written = Vec::with_capacity(children.len());
        for child in &children {
            if let Err(e) = self.backend.put(child).await {
                for id in &written {
                    if let Err(cleanup_err) = self.backend.delete(id).await {
                        warn!(job_id = %id, error = %cleanup_err, "failed to tombstone child after batch create failure");
                    }
                }
                return Err(e);
            }
            written.push(child.id.clone());
        }

        if let Err(e) = self.backend.put(&parent).await {
            for id in &written {
                if let Err(cleanup_err) = self.backend.delete(id).await {
                    warn!(job_id = %id, error = %cleanup_err, "failed to tombstone child after batch create failure");
                }
            }
            return Err(e);
        }

        for child in children {
            self.cache.put(child);
        }
        self.cache.put(parent);
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        if let Some(cached) = self.cache.get(job_id) {
            return Ok(Some(cached));
        }
        let record = self.backend.get(job_id).await?;
        if let Some(r) = &record {
            self.cache.put(r.clone());
        }
        Ok(record)
    }

    pub async fn require(&self, job_id: &str) -> Result<JobRecord> {
        self.get(job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))
    }

    /// Applies a status transition, enforcing monotonicity at this layer
    /// too (not just in [`JobRecord::transition_to`]) so a caller that
    /// skips the in-memory record and races a stale read still can't
    /// regress a terminal job.
    pub async fn transition_status(&self, job_id: &str, next: JobStatus) -> Result<JobRecord> {
        self.transition(job_id, next, None).await
    }

    /// Same as [`Self::transition_status`], but also attaches a structured
    /// failure reason to the record. Used whenever a job is driven to
    /// `failed` by something other than the worker's own completion
    /// report — a dispatch failure, a reconciler sweep marking a stuck
    /// job lost — so `JobRecord.error` reflects why, not just that.
    pub async fn transition_with_error(&self, job_id: &str, next: JobStatus, error: JobError) -> Result<JobRecord> {
        self.transition(job_id, next, Some(error)).await
    }

    async fn transition(&self, job_id: &str, next: JobStatus, error: Option<JobError>) -> Result<JobRecord> {
        let mut record = self.require(job_id).await?;
        let from = record.status;
        if !record.transition_to(next) {
            return Err(JobStoreError::IllegalTransition { job_id: job_id.to_string(), from, to: next });
        }
        if error.is_some() {
            record.error = error;
        }
        self.backend.put(&record).await?;
        self.cache.put(record.clone());
        info!(job_id, ?from, to = ?next, "job status transitioned");
        Ok(record)
    }

    /// Looks up an existing job by its idempotency key, scoped to the
    /// submitting user, for the admission pipeline's idempotency check
    /// (spec'd as step 5, before quota is reserved).
    pub async fn find_by_idempotency_key(&self, user_id: &str, idem_key: &str) -> Result<Option<JobRecord>> {
        self.backend.find_by_idempotency_key(user_id, idem_key).await
    }

    /// Fetches many records in one round-trip, chunked at the backend's
    /// page limit.
    pub async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<JobRecord>> {
        let mut out = Vec::with_capacity(job_ids.len());
        for chunk in job_ids.chunks(BATCH_GET_CHUNK_SIZE) {
            out.extend(self.backend.batch_get(chunk).await?);
        }
        Ok(out)
    }

    /// Stores job output, offloading to object storage and leaving a
    /// pointer on the record when the serialized payload is too large
    /// for an inline document-store attribute.
    pub async fn attach_output(
        &self,
        job_id: &str,
        user_id: &str,
        results: serde_json::Value,
        batch_id: Option<&str>,
    ) -> Result<()> {
        let mut record = self.require(job_id).await?;
        let serialized = serde_json::to_vec(&results)?;

        record.output_data = Some(if serialized.len() > INLINE_RESULT_BYTES_LIMIT {
            let metadata = serde_json::json!({"files_stored": true, "offloaded": true});
            self.storage
                .store_job_result_atomic(user_id, job_id, &results, None, &metadata, batch_id)
                .await?;
            let path = omtx_types::paths::job_artifact_path(user_id, job_id, omtx_types::paths::ArtifactKind::Results);
            OutputData::Pointer {
                results_in_object_store: true,
                path,
                size_bytes: serialized.len() as u64,
            }
        } else {
            let metadata = serde_json::json!({"files_stored": true});
            self.storage
                .store_job_result_atomic(user_id, job_id, &results, None, &metadata, batch_id)
                .await?;
            OutputData::Inline(results)
        });

        self.backend.put(&record).await?;
        self.cache.put(record);
        Ok(())
    }

    pub async fn list_by_user(&self, user_id: &str, job_type_filter: Option<JobType>) -> Result<Vec<JobRecord>> {
        let filter_str = job_type_filter
            .map(|jt| serde_json::to_value(jt).ok().and_then(|v| v.as_str().map(String::from)))
            .flatten();
        self.backend.query_by_user(user_id, filter_str.as_deref()).await
    }

    pub async fn list_batch_children(&self, batch_parent_id: &str) -> Result<Vec<JobRecord>> {
        self.backend.query_by_batch_parent(batch_parent_id).await
    }

    pub async fn stuck_running_jobs(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<JobRecord>> {
        self.backend.query_running_older_than(cutoff).await
    }

    /// Updates a batch parent's progress counters after a child's status
    /// changes. Does not itself decide completion semantics — the
    /// aggregator owns that — it just persists the snapshot.
    pub async fn update_batch_progress(&self, parent_id: &str, progress: BatchProgress) -> Result<()> {
        let mut parent = self.require(parent_id).await?;
        if !parent.is_batch_parent() {
            warn!(parent_id, "update_batch_progress called on a non-parent record");
        }
        let parent_done = progress.is_complete();
        parent.batch_progress = Some(progress);
        self.backend.put(&parent).await?;
        self.cache.put(parent);
        if parent_done {
            info!(parent_id, "batch progress reached completion");
        }
        Ok(())
    }

    pub fn invalidate_cache(&self, job_id: &str) {
        self.cache.invalidate(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> JobStore {
        JobStore::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(omtx_storage_gateway::StorageGateway::new(Arc::new(
                omtx_storage_gateway::InMemoryObjectStore::new(),
            ))),
        )
    }

    fn sample(id: &str, user: &str) -> JobRecord {
        JobRecord::new(id.into(), JobType::Individual, "protein_ligand_binding", "boltz2", user, serde_json::json!({}))
    }

    #[tokio::test]
    async fn create_then_get_round_trips_through_the_cache() {
        let store = store();
        store.create(sample("j1", "u1")).await.unwrap();
        let fetched = store.get("j1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "j1");
    }

    #[tokio::test]
    async fn transition_status_rejects_illegal_moves() {
        let store = store();
        store.create(sample("j2", "u1")).await.unwrap();
        let err = store.transition_status("j2", JobStatus::Completed).await.unwrap_err();
        assert!(matches!(err, JobStoreError::IllegalTransition { .. }));
        store.transition_status("j2", JobStatus::Queued).await.unwrap();
        store.transition_status("j2", JobStatus::Running).await.unwrap();
        let record = store.transition_status("j2", JobStatus::Completed).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn attach_output_stores_inline_for_small_payloads() {
        let store = store();
        store.create(sample("j3", "u1")).await.unwrap();
        store
            .attach_output("j3", "u1", serde_json::json!({"affinity": 0.9}), None)
            .await
            .unwrap();
        let record = store.require("j3").await.unwrap();
        assert!(matches!(record.output_data, Some(OutputData::Inline(_))));
    }

    #[tokio::test]
    async fn batch_children_are_queryable_by_parent() {
        let store = store();
        let parent = sample("b1", "u1");
        let mut children = vec![];
        for i in 0..3 {
            let mut child = sample(&format!("b1-c{i}"), "u1");
            child.batch_parent_id = Some("b1".into());
            children.push(child);
        }
        store.create_batch(parent, children).await.unwrap();
        let fetched = store.list_batch_children("b1").await.unwrap();
        assert_eq!(fetched.len(), 3);
    }

    #[tokio::test]
    async fn transition_with_error_attaches_the_failure_reason() {
        let store = store();
        store.create(sample("j4", "u1")).await.unwrap();
        store.transition_status("j4", JobStatus::Queued).await.unwrap();
        let record = store
            .transition_with_error("j4", JobStatus::Failed, JobError::new("dispatch_failed", "queue unreachable"))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let error = record.error.expect("error should be set");
        assert_eq!(error.kind, "dispatch_failed");
    }

    #[tokio::test]
    async fn find_by_idempotency_key_is_scoped_to_the_user() {
        let store = store();
        let mut job = sample("j5", "u1");
        job.idempotency_key = Some("key-1".into());
        store.create(job).await.unwrap();

        let found = store.find_by_idempotency_key("u1", "key-1").await.unwrap();
        assert_eq!(found.unwrap().id, "j5");

        let not_found = store.find_by_idempotency_key("u2", "key-1").await.unwrap();
        assert!(not_found.is_none());
    }

    #[tokio::test]
    async fn batch_get_fetches_multiple_records_in_one_call() {
        let store = store();
        store.create(sample("j6", "u1")).await.unwrap();
        store.create(sample("j7", "u1")).await.unwrap();
        let records = store.batch_get(&["j6".to_string(), "j7".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
