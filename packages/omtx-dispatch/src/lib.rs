//! Dispatches ready jobs to the external task queue, stamping an OIDC
//! identity token and recording the queue's receipt on the job record.

pub mod error;
pub mod oidc;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use omtx_types::job::JobType;

pub use error::{DispatchError, Result};
pub use oidc::OidcSigner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Individual jobs and `priority=high` batches. Default bound 4.
    Interactive,
    /// `priority=normal|low` jobs and batch children. Default bound 12.
    Bulk,
}

impl Lane {
    fn name(self) -> &'static str {
        match self {
            Lane::Interactive => "interactive",
            Lane::Bulk => "bulk",
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskPayload {
    job_id: String,
    job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_parent_id: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub task_name: String,
    pub lane: &'static str,
}

pub struct DispatcherConfig {
    pub worker_url: String,
    pub service_account: String,
    pub signing_secret: Vec<u8>,
    pub interactive_cap: usize,
    pub bulk_cap: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_url: "https://worker.invalid".into(),
            service_account: "worker@omtx.iam".into(),
            signing_secret: b"dev-only-secret-change-me".to_vec(),
            interactive_cap: 4,
            bulk_cap: 12,
        }
    }
}

pub struct TaskDispatcher {
    http: reqwest::Client,
    worker_url: String,
    signer: OidcSigner,
    interactive_sem: Arc<Semaphore>,
    bulk_sem: Arc<Semaphore>,
    receipts: DashMap<(String, String), DispatchReceipt>,
    dispatched_total: AtomicU64,
}

impl TaskDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer: OidcSigner::new(config.service_account, config.worker_url.clone(), &config.signing_secret),
            worker_url: config.worker_url,
            interactive_sem: Arc::new(Semaphore::new(config.interactive_cap)),
            bulk_sem: Arc::new(Semaphore::new(config.bulk_cap)),
            receipts: DashMap::new(),
            dispatched_total: AtomicU64::new(0),
        }
    }

    fn semaphore_for(&self, lane: Lane) -> &Semaphore {
        match lane {
            Lane::Interactive => &self.interactive_sem,
            Lane::Bulk => &self.bulk_sem,
        }
    }

    /// Dispatches a single job on `lane`. If `idem_key` has already been
    /// dispatched for `user_id`, returns the original receipt without
    /// re-enqueuing.
    pub async fn dispatch_one(
        &self,
        job_id: &str,
        job_type: JobType,
        batch_parent_id: Option<&str>,
        lane: Lane,
        idem_key: Option<&str>,
        user_id: &str,
    ) -> Result<DispatchReceipt> {
        if let Some(key) = idem_key {
            if let Some(existing) = self.receipts.get(&(key.to_string(), user_id.to_string())) {
                info!(job_id, idem_key = key, "dispatch idempotent replay, returning existing receipt");
                return Ok(existing.clone());
            }
        }

        let Ok(_permit) = self.semaphore_for(lane).try_acquire() else {
            return Err(DispatchError::LaneAtCapacity(lane.name()));
        };

        let token = self.signer.mint()?;
        let payload = TaskPayload {
            job_id: job_id.to_string(),
            job_type,
            batch_parent_id: batch_parent_id.map(String::from),
            timestamp: chrono::Utc::now(),
        };

        let response = self
            .http
            .post(format!("{}/predict", self.worker_url))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(job_id, %status, "worker rejected task dispatch");
            return Err(DispatchError::WorkerRejected(format!("{status}: {body}")));
        }

        let receipt = DispatchReceipt {
            task_name: format!("tasks/{}/{}", lane.name(), Uuid::new_v4()),
            lane: lane.name(),
        };
        if let Some(key) = idem_key {
            self.receipts
                .insert((key.to_string(), user_id.to_string()), receipt.clone());
        }
        self.dispatched_total.fetch_add(1, Ordering::Relaxed);
        info!(job_id, lane = lane.name(), task_name = %receipt.task_name, "dispatched task");
        Ok(receipt)
    }

    /// Fans a batch's children out through the bulk lane, bounded by its
    /// configured concurrency. Order of results matches `children`'s
    /// order is NOT preserved (buffer_unordered completes whichever
    /// finishes first) — callers key results back by job_id.
    pub async fn dispatch_batch_children(
        &self,
        batch_parent_id: &str,
        children: Vec<(String, JobType)>,
        user_id: &str,
    ) -> Vec<(String, Result<DispatchReceipt>)> {
        let bulk_cap = self.bulk_sem.available_permits().max(1);
        stream::iter(children.into_iter())
            .map(|(job_id, job_type)| async move {
                let result = self
                    .dispatch_one(&job_id, job_type, Some(batch_parent_id), Lane::Bulk, None, user_id)
                    .await;
                (job_id, result)
            })
            .buffer_unordered(bulk_cap)
            .collect()
            .await
    }

    pub fn dispatched_total(&self) -> u64 {
        self.dispatched_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interactive_lane_at_capacity_refuses_immediately() {
        let mut config = DispatcherConfig::default();
        config.interactive_cap = 1;
        let dispatcher = TaskDispatcher::new(config);

        let permit = dispatcher.interactive_sem.clone().try_acquire_owned().unwrap();
        let err = dispatcher
            .dispatch_one("job-1", JobType::Individual, None, Lane::Interactive, None, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::LaneAtCapacity("interactive")));
        drop(permit);
    }
}
