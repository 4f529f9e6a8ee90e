//! Periodic sweep that repairs state the normal request/webhook paths
//! can miss: a worker that dies mid-task and never calls back, or a
//! crash between a child reaching its last terminal status and the
//! aggregator materializing the batch's artifacts. Runs on a fixed
//! interval for the lifetime of the process; never writes state
//! directly, only drives it through the same job store / aggregator /
//! quota entry points a request handler would use.

use std::time::Duration;

use omtx_aggregator::ChildOutcome;
use omtx_types::job::{JobError, JobStatus, JobType};
use tracing::{info, warn};

use crate::state::AppState;

pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.reconcile_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&state).await {
            warn!(error = %e, "reconciliation sweep failed");
        }
    }
}

async fn sweep_once(state: &AppState) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(state.config.stuck_threshold_secs as i64);
    let stuck = state.job_store.stuck_running_jobs(cutoff).await?;
    if stuck.is_empty() {
        return Ok(());
    }
    info!(count = stuck.len(), "reconciler found stuck running jobs");

    for job in stuck {
        match job.job_type {
            JobType::BatchParent => {
                if let Some(progress) = &job.batch_progress {
                    if progress.is_complete() {
                        info!(parent_id = %job.id, "stuck batch parent has a complete child set, re-materializing");
                        if let Err(e) = state.aggregator.materialize_batch(&job.id, progress).await {
                            warn!(parent_id = %job.id, error = %e, "re-materialization during reconciliation failed");
                        }
                    } else {
                        warn!(parent_id = %job.id, completed = progress.completed, total = progress.total, "batch parent stuck with incomplete children, leaving for the next sweep");
                    }
                }
            }
            JobType::Individual | JobType::BatchChild => {
                warn!(job_id = %job.id, "marking stuck job as failed (dispatch presumed lost)");
                let tier = state.tier_for(&job.user_id);
                let error = JobError::new("dispatch_lost", "no completion signal received before the stuck threshold elapsed");
                if let Err(e) = state.job_store.transition_with_error(&job.id, JobStatus::Failed, error).await {
                    warn!(job_id = %job.id, error = %e, "could not transition stuck job to failed");
                    continue;
                }

                if let Some(parent_id) = &job.batch_parent_id {
                    if let Err(e) = state.aggregator.on_child_terminal(parent_id, &job.id, ChildOutcome::Failed).await {
                        warn!(job_id = %job.id, parent_id, error = %e, "failed to notify aggregator of stuck-child failure");
                    }
                    if let Ok(parent) = state.job_store.require(parent_id).await {
                        if parent.status.is_terminal() {
                            let _ = state.quota.release_resources(&parent.user_id, tier, parent_id, None, true).await;
                        }
                    }
                } else {
                    let _ = state.quota.release_resources(&job.user_id, tier, &job.id, None, false).await;
                }
            }
        }
    }

    // Quota resets are swept lazily on every `QuotaManager::check_resource_availability`/
    // `reserve_resources` call (see `QuotaLedger::load_or_init`), and the ledger has no
    // enumerable key set to walk eagerly here — so there is no separate quota sweep step.
    Ok(())
}
