//! Resource quota tracking: GPU time, storage, and concurrency limits
//! per user tier, checked at admission and released on job completion.

pub mod error;
pub mod estimate;
pub mod ledger;
pub mod metrics;

use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use omtx_types::quota::{ResourceEstimate, ResourceKind, UserQuota, UserTier};

pub use error::{QuotaError, Result};
pub use estimate::estimate_job_resources;
use ledger::QuotaLedger;
use metrics::{QuotaMetrics, QuotaMetricsSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct QuotaViolation {
    pub resource: &'static str,
    pub required: f64,
    pub available: f64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaWarning {
    pub resource: &'static str,
    pub usage_after_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub allowed: bool,
    pub violations: Vec<QuotaViolation>,
    pub warnings: Vec<QuotaWarning>,
}

pub struct QuotaManager {
    ledger: QuotaLedger,
    active_jobs: DashMap<String, DashMap<String, ResourceEstimate>>,
    active_batches: DashMap<String, DashMap<String, ResourceEstimate>>,
    metrics: QuotaMetrics,
}

impl QuotaManager {
    pub fn new(redis: Option<deadpool_redis::Pool>) -> Self {
        Self {
            ledger: QuotaLedger::new(redis),
            active_jobs: DashMap::new(),
            active_batches: DashMap::new(),
            metrics: QuotaMetrics::default(),
        }
    }

    pub fn metrics(&self) -> QuotaMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn active_count(&self, user_id: &str) -> u32 {
        self.active_jobs
            .get(user_id)
            .map(|m| m.len() as u32)
            .unwrap_or(0)
    }

    /// Evaluates `estimate` against the user's current quota without
    /// mutating anything. Never errors: a lookup failure is treated as
    /// "allowed" (fail open), matching the original service's behavior.
    pub async fn check_resource_availability(
        &self,
        user_id: &str,
        tier: UserTier,
        estimate: &ResourceEstimate,
    ) -> CheckResult {
        self.metrics.quota_checks.fetch_add(1, Ordering::Relaxed);

        let quota = self.ledger.load_or_init(user_id, tier, &self.metrics).await;
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        check_one(&quota, ResourceKind::GpuMinutes, estimate.gpu_minutes, &mut violations, &mut warnings);
        check_one(&quota, ResourceKind::StorageGb, estimate.storage_gb, &mut violations, &mut warnings);

        if let Some(concurrent) = quota.resource(ResourceKind::ConcurrentJobs) {
            let current = self.active_count(user_id);
            let projected = current + estimate.concurrent_jobs;
            if (projected as f64) > concurrent.limit {
                violations.push(QuotaViolation {
                    resource: "concurrent_jobs",
                    required: projected as f64,
                    available: concurrent.limit,
                    message: None,
                });
            }
        }

        check_one(
            &quota,
            ResourceKind::MonthlyJobs,
            estimate.concurrent_jobs as f64,
            &mut violations,
            &mut warnings,
        );

        if estimate.is_priority {
            if let Some(priority) = quota.resource(ResourceKind::PriorityAccess) {
                if priority.limit <= 0.0 {
                    violations.push(QuotaViolation {
                        resource: "priority_access",
                        required: 1.0,
                        available: 0.0,
                        message: Some("priority queue access is not available for your tier".into()),
                    });
                }
            }
        }

        let allowed = violations.is_empty();
        if !allowed {
            self.metrics.quota_violations.fetch_add(1, Ordering::Relaxed);
        }
        CheckResult {
            allowed,
            violations,
            warnings,
        }
    }

    /// Debits the estimate against the user's GPU/storage/monthly-job
    /// counters and records the job as active, so later concurrency
    /// checks see it. Idempotent per `job_id`: calling twice just
    /// overwrites the tracked estimate.
    pub async fn reserve_resources(
        &self,
        user_id: &str,
        tier: UserTier,
        job_id: &str,
        estimate: ResourceEstimate,
        is_batch: bool,
    ) {
        let mut quota = self.ledger.load_or_init(user_id, tier, &self.metrics).await;
        if let Some(r) = quota.resource_mut(ResourceKind::GpuMinutes) {
            r.used += estimate.gpu_minutes;
        }
        if let Some(r) = quota.resource_mut(ResourceKind::StorageGb) {
            r.used += estimate.storage_gb;
        }
        if let Some(r) = quota.resource_mut(ResourceKind::MonthlyJobs) {
            r.used += estimate.concurrent_jobs as f64;
        }
        self.ledger.save(&quota, &self.metrics).await;

        let bucket = if is_batch { &self.active_batches } else { &self.active_jobs };
        bucket
            .entry(user_id.to_string())
            .or_default()
            .insert(job_id.to_string(), estimate);

        info!(user_id, job_id, gpu_minutes = estimate.gpu_minutes, storage_gb = estimate.storage_gb, "reserved resources");
    }

    /// Releases a job's tracked reservation. If `actual_usage` is given
    /// and differs from the original estimate by more than a trivial
    /// margin, the difference (positive or negative) is applied to the
    /// cumulative counters so persistent drift doesn't accumulate.
    pub async fn release_resources(
        &self,
        user_id: &str,
        tier: UserTier,
        job_id: &str,
        actual_usage: Option<ResourceEstimate>,
        is_batch: bool,
    ) -> Result<()> {
        let bucket = if is_batch { &self.active_batches } else { &self.active_jobs };
        let original = bucket
            .get(user_id)
            .and_then(|m| m.get(job_id).map(|e| *e));
        bucket.get(user_id).map(|m| m.remove(job_id));

        let Some(original) = original else {
            return Err(QuotaError::NoActiveReservation(job_id.to_string()));
        };

        if let Some(actual) = actual_usage {
            let mut quota = self.ledger.load_or_init(user_id, tier, &self.metrics).await;
            let gpu_diff = actual.gpu_minutes - original.gpu_minutes;
            if gpu_diff.abs() > 0.1 {
                if let Some(r) = quota.resource_mut(ResourceKind::GpuMinutes) {
                    r.used = (r.used + gpu_diff).max(0.0);
                }
            }
            let storage_diff = actual.storage_gb - original.storage_gb;
            if storage_diff.abs() > 0.001 {
                if let Some(r) = quota.resource_mut(ResourceKind::StorageGb) {
                    r.used = (r.used + storage_diff).max(0.0);
                }
            }
            self.ledger.save(&quota, &self.metrics).await;
        }

        info!(user_id, job_id, "released resources");
        Ok(())
    }

    pub async fn user_quota(&self, user_id: &str, tier: UserTier) -> UserQuota {
        self.ledger.load_or_init(user_id, tier, &self.metrics).await
    }
}

fn check_one(
    quota: &UserQuota,
    kind: ResourceKind,
    required: f64,
    violations: &mut Vec<QuotaViolation>,
    warnings: &mut Vec<QuotaWarning>,
) {
    let Some(resource) = quota.resource(kind) else {
        return;
    };
    if resource.remaining() < required {
        violations.push(QuotaViolation {
            resource: kind.as_str(),
            required,
            available: resource.remaining(),
            message: None,
        });
    } else if resource.limit > 0.0 {
        let usage_after = resource.usage_pct() + (required / resource.limit * 100.0);
        if usage_after >= resource.soft_limit_pct {
            warnings.push(QuotaWarning {
                resource: kind.as_str(),
                usage_after_pct: usage_after,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn default_tier_allows_a_small_job_and_rejects_an_oversized_one() {
        let mgr = QuotaManager::new(None);
        let small = estimate_job_resources("boltz2", 1, false);
        let result = mgr.check_resource_availability("u1", UserTier::Default, &small).await;
        assert!(result.allowed);

        let huge = estimate_job_resources("boltz2", 1000, false);
        let result = mgr.check_resource_availability("u1", UserTier::Default, &huge).await;
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.resource == "gpu_minutes"));
    }

    #[tokio::test]
    async fn reserve_then_release_round_trips_without_leaking_usage() {
        let mgr = QuotaManager::new(None);
        let est = estimate_job_resources("boltz2", 1, false);
        mgr.reserve_resources("u2", UserTier::Default, "job-1", est, false).await;
        let quota = mgr.user_quota("u2", UserTier::Default).await;
        assert!(quota.resource(ResourceKind::GpuMinutes).unwrap().used > 0.0);

        mgr.release_resources("u2", UserTier::Default, "job-1", None, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_of_unknown_job_errors() {
        let mgr = QuotaManager::new(None);
        let err = mgr
            .release_resources("u3", UserTier::Default, "missing", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::NoActiveReservation(_)));
    }

    #[tokio::test]
    async fn priority_access_is_rejected_on_default_tier() {
        let mgr = QuotaManager::new(None);
        let est = ResourceEstimate::from_units(1.0, 1.0, 1, true);
        let result = mgr.check_resource_availability("u4", UserTier::Default, &est).await;
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.resource == "priority_access"));
    }
}
