//! Atomic object-storage gateway.
//!
//! Wraps an [`ObjectStore`] with the hierarchical artifact layout and the
//! temp-write → validate → finalize transaction protocol that every job
//! and batch artifact write goes through. No caller writes an object
//! directly; everything routes through a [`StorageTransaction`] so a
//! partially-written job result never becomes visible.

pub mod client;
pub mod compress;
pub mod error;
pub mod transaction;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use omtx_types::paths::{self, ArtifactKind};

pub use client::{InMemoryObjectStore, ObjectStore, S3ObjectStore};
pub use error::{Result, StorageError};
pub use transaction::StorageTransaction;

pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn begin(&self) -> StorageTransaction {
        StorageTransaction::new()
    }

    /// Stages a write under the transaction's scratch prefix. Nothing is
    /// visible at `final_key` until [`Self::commit`] runs.
    pub async fn stage(
        &self,
        txn: &mut StorageTransaction,
        final_key: &str,
        body: Vec<u8>,
        content_type: &'static str,
    ) -> Result<()> {
        if !paths::is_schema_valid(final_key) {
            return Err(StorageError::SchemaViolation(final_key.to_string()));
        }
        let temp_key = txn.temp_key_for(final_key);
        self.store.put(&temp_key, body, content_type).await?;
        txn.staged.push(transaction::StagedWrite {
            temp_key,
            final_key: final_key.to_string(),
            content_type,
        });
        Ok(())
    }

    /// Stages a JSON document, serialized with `serde_json::to_vec_pretty`
    /// to match the indented output the original service wrote.
    pub async fn stage_json<T: Serialize>(
        &self,
        txn: &mut StorageTransaction,
        final_key: &str,
        value: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        self.stage(txn, final_key, body, "application/json").await
    }

    /// Validates every staged object is readable, then copies each to its
    /// final destination and deletes the temp copy. On any failure mid-way
    /// the already-finalized files are left in place (the commit point is
    /// per-file, matching the source service's best-effort finalize), and
    /// the remaining temp files are cleaned up by [`Self::rollback`].
    pub async fn commit(&self, mut txn: StorageTransaction) -> Result<Vec<String>> {
        if !txn.is_open() {
            return Err(StorageError::AlreadyCommitted(txn.id.clone()));
        }

        for staged in &txn.staged {
            if !self.store.exists(&staged.temp_key).await? {
                error!(txn_id = %txn.id, key = %staged.temp_key, "staged object missing at commit time");
                self.rollback(txn).await?;
                return Err(StorageError::ValidationFailed {
                    key: staged.temp_key.clone(),
                    reason: "object vanished before commit".into(),
                });
            }
        }

        let mut finalized = Vec::with_capacity(txn.staged.len());
        for staged in &txn.staged {
            self.store.copy(&staged.temp_key, &staged.final_key).await?;
            self.store.delete(&staged.temp_key).await?;
            finalized.push(staged.final_key.clone());
        }

        txn.committed = true;
        info!(txn_id = %txn.id, files = finalized.len(), "transaction committed");
        Ok(finalized)
    }

    /// Deletes every staged temp object without touching the canonical
    /// tree. Best-effort: a delete failure is logged, not propagated,
    /// since the temp prefix is swept by the reconciler regardless.
    pub async fn rollback(&self, mut txn: StorageTransaction) -> Result<()> {
        if txn.committed {
            return Err(StorageError::AlreadyCommitted(txn.id.clone()));
        }
        for staged in &txn.staged {
            if let Err(e) = self.store.delete(&staged.temp_key).await {
                warn!(txn_id = %txn.id, key = %staged.temp_key, error = %e, "rollback cleanup failed");
            }
        }
        txn.rolled_back = true;
        Ok(())
    }

    pub async fn read_artifact(
        &self,
        user_id: &str,
        job_id: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>> {
        self.store
            .get(&paths::job_artifact_path(user_id, job_id, kind))
            .await
    }

    pub async fn read_key(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get(key).await
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.store.list_prefix(prefix).await
    }

    /// Writes every produced artifact for a completed individual job (or
    /// batch child) in one transaction: results, optional structure file,
    /// and metadata, plus a best-effort search-index entry. Mirrors
    /// `store_job_result_atomic` in the original service.
    pub async fn store_job_result_atomic(
        &self,
        user_id: &str,
        job_id: &str,
        results: &JsonValue,
        structure: Option<&[u8]>,
        metadata: &JsonValue,
        batch_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut txn = self.begin();

        let results_key = match batch_id {
            Some(b) => paths::batch_child_artifact_path(user_id, b, job_id, ArtifactKind::Results),
            None => paths::job_artifact_path(user_id, job_id, ArtifactKind::Results),
        };
        self.stage_json(&mut txn, &results_key, results).await?;

        if let Some(structure_bytes) = structure {
            let structure_key = match batch_id {
                Some(b) => {
                    paths::batch_child_artifact_path(user_id, b, job_id, ArtifactKind::Structure)
                }
                None => paths::job_artifact_path(user_id, job_id, ArtifactKind::Structure),
            };
            let compressed = compress::gzip(structure_bytes)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            self.stage(&mut txn, &structure_key, compressed, "application/gzip")
                .await?;
        }

        let metadata_key = match batch_id {
            Some(b) => paths::batch_child_artifact_path(user_id, b, job_id, ArtifactKind::Metadata),
            None => paths::job_artifact_path(user_id, job_id, ArtifactKind::Metadata),
        };
        self.stage_json(&mut txn, &metadata_key, metadata).await?;

        let index_entry = serde_json::json!({
            "job_id": job_id,
            "user_id": user_id,
            "batch_id": batch_id,
            "indexed_at": chrono::Utc::now(),
        });
        self.stage_json(
            &mut txn,
            &paths::job_search_index_path(job_id),
            &index_entry,
        )
        .await?;

        self.commit(txn).await
    }

    /// Writes a batch parent's metadata document atomically.
    pub async fn store_batch_metadata_atomic(
        &self,
        user_id: &str,
        batch_id: &str,
        metadata: &JsonValue,
    ) -> Result<Vec<String>> {
        let mut txn = self.begin();
        self.stage_json(
            &mut txn,
            &paths::batch_metadata_path(user_id, batch_id),
            metadata,
        )
        .await?;
        self.commit(txn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StorageGateway {
        StorageGateway::new(Arc::new(InMemoryObjectStore::new()))
    }

    #[tokio::test]
    async fn commit_makes_staged_writes_visible_at_final_keys() {
        let gw = gateway();
        let mut txn = gw.begin();
        gw.stage_json(&mut txn, "users/u1/jobs/j1/results.json", &serde_json::json!({"ok": true}))
            .await
            .unwrap();
        let finalized = gw.commit(txn).await.unwrap();
        assert_eq!(finalized, vec!["users/u1/jobs/j1/results.json".to_string()]);
        let body = gw.read_key("users/u1/jobs/j1/results.json").await.unwrap();
        assert_eq!(body, br#"{
  "ok": true
}"#);
    }

    #[tokio::test]
    async fn rollback_leaves_no_trace_at_the_final_key() {
        let gw = gateway();
        let mut txn = gw.begin();
        gw.stage_json(&mut txn, "users/u1/jobs/j2/results.json", &serde_json::json!({}))
            .await
            .unwrap();
        gw.rollback(txn).await.unwrap();
        let err = gw.read_key("users/u1/jobs/j2/results.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn stage_rejects_paths_outside_the_schema() {
        let gw = gateway();
        let mut txn = gw.begin();
        let err = gw
            .stage_json(&mut txn, "scratch/whatever.json", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn store_job_result_atomic_writes_all_three_artifacts_and_index() {
        let gw = gateway();
        let written = gw
            .store_job_result_atomic(
                "u1",
                "j3",
                &serde_json::json!({"affinity": 0.8}),
                Some(b"mock cif contents"),
                &serde_json::json!({"files_stored": true}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(written.len(), 4);
        assert!(written.contains(&"users/u1/jobs/j3/results.json".to_string()));
        assert!(written.contains(&"index/jobs/j3.json".to_string()));
    }
}
