//! Batch progress tracking and summary-statistics aggregation.
//!
//! Owns the decision of when a batch parent is "done" (every child has
//! reached a terminal status) and, once it is, materializes the three
//! canonical batch artifacts through the Storage Gateway. Grounded on
//! `batch_relationship_manager.py`'s child-completion callback and its
//! `_calculate_batch_summary`/`_get_top_predictions` helpers.

pub mod artifacts;
pub mod error;
pub mod stats;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use omtx_job_store::JobStore;
use omtx_storage_gateway::StorageGateway;
use omtx_types::batch::BatchProgress;
use omtx_types::job::{JobStatus, OutputData};

pub use error::{AggregatorError, Result};
pub use stats::{BatchSummary, IndividualResult};

/// What happened to a batch child, as observed by whichever component
/// drives it to a terminal status (the completion handler, or the
/// reconciler marking a stuck job failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl From<ChildOutcome> for JobStatus {
    fn from(outcome: ChildOutcome) -> Self {
        match outcome {
            ChildOutcome::Completed => JobStatus::Completed,
            ChildOutcome::Failed => JobStatus::Failed,
            ChildOutcome::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Tracks per-parent progress and materializes batch artifacts once all
/// children are terminal.
///
/// Every parent's progress update and artifact write goes through a
/// per-parent mutex so two children finishing in the same instant can't
/// race each other into a torn `BatchProgress` read-modify-write, or both
/// decide they're the one to materialize the final artifacts.
pub struct BatchAggregator {
    job_store: Arc<JobStore>,
    storage: Arc<StorageGateway>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BatchAggregator {
    pub fn new(job_store: Arc<JobStore>, storage: Arc<StorageGateway>) -> Self {
        Self {
            job_store,
            storage,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, parent_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(parent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Called once a batch child reaches a terminal status. Updates the
    /// parent's progress counters and, if that was the last child,
    /// materializes the aggregated artifacts.
    pub async fn on_child_terminal(&self, parent_id: &str, job_id: &str, outcome: ChildOutcome) -> Result<()> {
        let lock = self.lock_for(parent_id);
        let _guard = lock.lock().await;

        let parent = self.job_store.require(parent_id).await?;
        let mut progress = parent.batch_progress.clone().unwrap_or_else(|| {
            BatchProgress::new(parent.batch_child_ids.len() as u32)
        });

        match outcome {
            ChildOutcome::Completed => progress.mark_completed(),
            ChildOutcome::Failed => progress.mark_failed(),
            ChildOutcome::Cancelled => progress.mark_cancelled(),
        }

        let complete = progress.is_complete();
        self.job_store.update_batch_progress(parent_id, progress.clone()).await?;
        info!(parent_id, job_id, ?outcome, complete, "batch child reached terminal status");

        if complete {
            self.materialize_batch(parent_id, &progress).await?;
        }
        Ok(())
    }

    /// Re-derives and re-writes the batch's artifacts from its children's
    /// current records. Idempotent: safe to call again (by the reconciler,
    /// say) after a partial prior write — it replaces all three artifacts
    /// in one transaction rather than patching them.
    pub async fn materialize_batch(&self, parent_id: &str, progress: &BatchProgress) -> Result<()> {
        let parent = self.job_store.require(parent_id).await?;
        let children = self.job_store.list_batch_children(parent_id).await?;

        let results = collect_results(&children);
        let Some(summary) = stats::summarize(&results) else {
            warn!(parent_id, "batch has no completed children to summarize, skipping artifact write");
            return Err(AggregatorError::Empty(parent_id.to_string()));
        };

        let final_status = if progress.failed > 0 || progress.cancelled > 0 {
            if progress.completed > 0 {
                JobStatus::PartiallyCompleted
            } else {
                JobStatus::Failed
            }
        } else {
            JobStatus::Completed
        };

        artifacts::materialize(&self.storage, &parent.user_id, parent_id, &results, &summary).await?;

        if parent.status != final_status && parent.status.can_transition_to(final_status) {
            self.job_store.transition_status(parent_id, final_status).await?;
        }

        info!(parent_id, total = results.len(), "batch artifacts materialized");
        Ok(())
    }

    /// Bundles a batch's three canonical artifacts into a zip for the
    /// on-demand export endpoint. Does not recompute anything — it reads
    /// back whatever was last committed by [`Self::materialize_batch`].
    pub async fn export_zip(&self, user_id: &str, batch_id: &str) -> Result<Vec<u8>> {
        artifacts::export_zip(&self.storage, user_id, batch_id).await
    }

    /// Drops the cached mutex for a parent once its batch is fully
    /// terminal, so the lock table doesn't grow unbounded across the
    /// service's lifetime.
    pub fn forget(&self, parent_id: &str) {
        self.locks.remove(parent_id);
    }
}

/// Extracts one [`IndividualResult`] per completed child, skipping
/// children that never produced output (failed/cancelled before running).
fn collect_results(children: &[omtx_types::job::JobRecord]) -> Vec<IndividualResult> {
    children
        .iter()
        .filter(|c| c.status == JobStatus::Completed)
        .filter_map(|c| {
            let value = match &c.output_data {
                Some(OutputData::Inline(v)) => v.clone(),
                _ => return None,
            };
            let ligand_name = c
                .metadata
                .get("ligand_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&c.id)
                .to_string();
            Some(IndividualResult {
                job_id: c.id.clone(),
                ligand_name,
                affinity: value.get("affinity").and_then(|v| v.as_f64()).unwrap_or(0.0),
                confidence: value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0),
                ptm: value.get("ptm_score").and_then(|v| v.as_f64()),
                iptm: value.get("iptm_score").and_then(|v| v.as_f64()),
                plddt: value.get("plddt_score").and_then(|v| v.as_f64()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use omtx_job_store::{InMemoryBackend, JobStore};
    use omtx_storage_gateway::{InMemoryObjectStore, StorageGateway};
    use omtx_types::job::{JobRecord, JobType};

    fn aggregator() -> BatchAggregator {
        let storage = Arc::new(StorageGateway::new(Arc::new(InMemoryObjectStore::new())));
        let job_store = Arc::new(JobStore::new(Arc::new(InMemoryBackend::new()), storage.clone()));
        BatchAggregator::new(job_store, storage)
    }

    async fn seed_batch(agg: &BatchAggregator, parent_id: &str, n: usize) {
        let mut parent = JobRecord::new(parent_id.into(), JobType::BatchParent, "protein_ligand_binding", "boltz2", "u1", serde_json::json!({}));
        parent.transition_to(JobStatus::Queued);
        parent.transition_to(JobStatus::Running);
        parent.batch_progress = Some(BatchProgress::new(n as u32));

        let mut children = vec![];
        for i in 0..n {
            let mut child = JobRecord::new(format!("{parent_id}-c{i}"), JobType::BatchChild, "protein_ligand_binding", "boltz2", "u1", serde_json::json!({}));
            child.batch_parent_id = Some(parent_id.to_string());
            child.metadata.insert("ligand_name".into(), serde_json::json!(format!("lig-{i}")));
            children.push(child);
        }
        parent.batch_child_ids = children.iter().map(|c| c.id.clone()).collect();
        agg.job_store.create_batch(parent, children).await.unwrap();
    }

    async fn complete_child(agg: &BatchAggregator, job_id: &str, affinity: f64, confidence: f64) {
        agg.job_store.transition_status(job_id, JobStatus::Queued).await.unwrap();
        agg.job_store.transition_status(job_id, JobStatus::Running).await.unwrap();
        agg.job_store
            .attach_output(job_id, "u1", serde_json::json!({"affinity": affinity, "confidence": confidence, "ptm_score": 0.8}), None)
            .await
            .unwrap();
        agg.job_store.transition_status(job_id, JobStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn last_child_completion_triggers_materialization() {
        let agg = aggregator();
        seed_batch(&agg, "b1", 2).await;

        complete_child(&agg, "b1-c0", 0.5, 0.6).await;
        agg.on_child_terminal("b1", "b1-c0", ChildOutcome::Completed).await.unwrap();
        let parent = agg.job_store.require("b1").await.unwrap();
        assert!(!parent.batch_progress.unwrap().is_complete());

        complete_child(&agg, "b1-c1", 0.3, 0.9).await;
        agg.on_child_terminal("b1", "b1-c1", ChildOutcome::Completed).await.unwrap();

        let summary_bytes = agg.storage.read_key(&omtx_types::paths::batch_summary_path("u1", "b1")).await.unwrap();
        let summary: stats::BatchSummary = serde_json::from_slice(&summary_bytes).unwrap();
        assert_eq!(summary.total_results, 2);

        let parent = agg.job_store.require("b1").await.unwrap();
        assert_eq!(parent.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn mixed_outcomes_land_on_partially_completed() {
        let agg = aggregator();
        seed_batch(&agg, "b2", 2).await;

        complete_child(&agg, "b2-c0", 0.4, 0.5).await;
        agg.on_child_terminal("b2", "b2-c0", ChildOutcome::Completed).await.unwrap();

        agg.job_store.transition_status("b2-c1", JobStatus::Queued).await.unwrap();
        agg.job_store.transition_status("b2-c1", JobStatus::Running).await.unwrap();
        agg.job_store.transition_status("b2-c1", JobStatus::Failed).await.unwrap();
        agg.on_child_terminal("b2", "b2-c1", ChildOutcome::Failed).await.unwrap();

        let parent = agg.job_store.require("b2").await.unwrap();
        assert_eq!(parent.status, JobStatus::PartiallyCompleted);
    }

    #[tokio::test]
    async fn rematerializing_replaces_rather_than_appends() {
        let agg = aggregator();
        seed_batch(&agg, "b3", 1).await;
        complete_child(&agg, "b3-c0", 0.5, 0.5).await;
        agg.on_child_terminal("b3", "b3-c0", ChildOutcome::Completed).await.unwrap();

        let progress = agg.job_store.require("b3").await.unwrap().batch_progress.unwrap();
        agg.materialize_batch("b3", &progress).await.unwrap();

        let summary_bytes = agg.storage.read_key(&omtx_types::paths::batch_summary_path("u1", "b3")).await.unwrap();
        let summary: stats::BatchSummary = serde_json::from_slice(&summary_bytes).unwrap();
        assert_eq!(summary.total_results, 1);
    }
}
