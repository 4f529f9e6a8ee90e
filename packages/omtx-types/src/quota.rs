//! Per-user resource quotas and the tier table they derive from.
//!
//! Tier limits are taken verbatim from the source system's
//! `ResourceQuotaManager.QuotaConfig.QUOTAS` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    Default,
    Premium,
    Enterprise,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    GpuMinutes,
    StorageGb,
    ConcurrentJobs,
    ConcurrentBatches,
    MonthlyJobs,
    PriorityAccess,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::GpuMinutes,
        ResourceKind::StorageGb,
        ResourceKind::ConcurrentJobs,
        ResourceKind::ConcurrentBatches,
        ResourceKind::MonthlyJobs,
        ResourceKind::PriorityAccess,
    ];

    /// Whether this resource is a real-time concurrency count (no
    /// periodic reset, released as jobs finish) rather than a cumulative
    /// counter reset on a schedule.
    pub fn is_concurrency(self) -> bool {
        matches!(
            self,
            ResourceKind::ConcurrentJobs | ResourceKind::ConcurrentBatches
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::GpuMinutes => "gpu_minutes",
            ResourceKind::StorageGb => "storage_gb",
            ResourceKind::ConcurrentJobs => "concurrent_jobs",
            ResourceKind::ConcurrentBatches => "concurrent_batches",
            ResourceKind::MonthlyJobs => "monthly_jobs",
            ResourceKind::PriorityAccess => "priority_access",
        }
    }
}

/// One resource's limit, usage, and reset policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaResource {
    pub limit: f64,
    pub used: f64,
    pub reset_period_days: u32,
    pub last_reset_at: DateTime<Utc>,
    pub soft_limit_pct: f64,
}

impl QuotaResource {
    pub fn remaining(&self) -> f64 {
        (self.limit - self.used).max(0.0)
    }

    pub fn usage_pct(&self) -> f64 {
        if self.limit <= 0.0 {
            100.0
        } else {
            (self.used / self.limit * 100.0).min(100.0)
        }
    }

    pub fn is_over_soft_limit(&self) -> bool {
        self.usage_pct() >= self.soft_limit_pct
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    /// `now - last_reset_at >= reset_period_days`; always `false` when
    /// `reset_period_days == 0` (persistent counters never auto-reset).
    pub fn should_reset(&self, now: DateTime<Utc>) -> bool {
        if self.reset_period_days == 0 {
            return false;
        }
        let elapsed = now.signed_duration_since(self.last_reset_at);
        elapsed.num_seconds() >= i64::from(self.reset_period_days) * 24 * 3600
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.used = 0.0;
        self.last_reset_at = now;
    }
}

/// A user's full resource account: one [`QuotaResource`] per
/// [`ResourceKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_id: String,
    pub tier: UserTier,
    pub resources: HashMap<ResourceKind, QuotaResource>,
}

/// `(limit, reset_period_days, soft_limit_pct)` per tier, straight from
/// the source system's quota table.
fn tier_row(tier: UserTier, kind: ResourceKind) -> (f64, u32, f64) {
    use ResourceKind::*;
    use UserTier::*;
    match (tier, kind) {
        (Default, GpuMinutes) => (60.0, 30, 80.0),
        (Default, StorageGb) => (1.0, 0, 85.0),
        (Default, ConcurrentJobs) => (2.0, 0, 100.0),
        (Default, ConcurrentBatches) => (1.0, 0, 100.0),
        (Default, MonthlyJobs) => (50.0, 30, 80.0),
        (Default, PriorityAccess) => (0.0, 0, 100.0),

        (Premium, GpuMinutes) => (300.0, 30, 80.0),
        (Premium, StorageGb) => (10.0, 0, 85.0),
        (Premium, ConcurrentJobs) => (5.0, 0, 100.0),
        (Premium, ConcurrentBatches) => (3.0, 0, 100.0),
        (Premium, MonthlyJobs) => (500.0, 30, 80.0),
        (Premium, PriorityAccess) => (1.0, 0, 100.0),

        (Enterprise, GpuMinutes) => (1800.0, 30, 85.0),
        (Enterprise, StorageGb) => (100.0, 0, 90.0),
        (Enterprise, ConcurrentJobs) => (20.0, 0, 100.0),
        (Enterprise, ConcurrentBatches) => (10.0, 0, 100.0),
        (Enterprise, MonthlyJobs) => (5000.0, 30, 85.0),
        (Enterprise, PriorityAccess) => (1.0, 0, 100.0),

        (Admin, GpuMinutes) => (10_000.0, 30, 95.0),
        (Admin, StorageGb) => (1000.0, 0, 95.0),
        (Admin, ConcurrentJobs) => (100.0, 0, 100.0),
        (Admin, ConcurrentBatches) => (50.0, 0, 100.0),
        (Admin, MonthlyJobs) => (100_000.0, 30, 95.0),
        (Admin, PriorityAccess) => (1.0, 0, 100.0),
    }
}

impl UserQuota {
    /// Builds a fresh quota account for `user_id` at `tier`, with every
    /// resource's usage at zero and `last_reset_at = now`.
    pub fn new_for_tier(user_id: impl Into<String>, tier: UserTier, now: DateTime<Utc>) -> Self {
        let mut resources = HashMap::new();
        for kind in ResourceKind::ALL {
            let (limit, reset_period_days, soft_limit_pct) = tier_row(tier, kind);
            resources.insert(
                kind,
                QuotaResource {
                    limit,
                    used: 0.0,
                    reset_period_days,
                    last_reset_at: now,
                    soft_limit_pct,
                },
            );
        }
        Self {
            user_id: user_id.into(),
            tier,
            resources,
        }
    }

    pub fn resource(&self, kind: ResourceKind) -> Option<&QuotaResource> {
        self.resources.get(&kind)
    }

    pub fn resource_mut(&mut self, kind: ResourceKind) -> Option<&mut QuotaResource> {
        self.resources.get_mut(&kind)
    }

    /// Applies [`QuotaResource::should_reset`] to every non-concurrency
    /// resource, resetting cumulative counters whose reset window has
    /// elapsed. Concurrency counters are never touched here — they're
    /// released on job completion, not reset on a schedule.
    pub fn sweep_resets(&mut self, now: DateTime<Utc>) -> u32 {
        let mut reset_count = 0;
        for (kind, resource) in self.resources.iter_mut() {
            if kind.is_concurrency() {
                continue;
            }
            if resource.should_reset(now) {
                resource.reset(now);
                reset_count += 1;
            }
        }
        reset_count
    }
}

/// Estimated resource requirements for a submitted job or batch, inflated
/// by the safety margins in spec §4.4 and floored to sane minimums.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub gpu_minutes: f64,
    pub storage_gb: f64,
    pub concurrent_jobs: u32,
    pub is_priority: bool,
}

impl ResourceEstimate {
    pub const GPU_SAFETY_MARGIN: f64 = 1.2;
    pub const STORAGE_SAFETY_MARGIN: f64 = 1.5;

    /// Builds an estimate from raw per-unit figures and a unit count
    /// (1 for an individual job, `len(ligands)` for a batch), applying
    /// the safety margins and floors from the source system.
    pub fn from_units(
        gpu_minutes_per_unit: f64,
        storage_mb_per_unit: f64,
        units: u32,
        is_priority: bool,
    ) -> Self {
        let gpu_minutes =
            (gpu_minutes_per_unit * units as f64 * Self::GPU_SAFETY_MARGIN).max(0.1);
        let storage_gb = ((storage_mb_per_unit * units as f64 / 1024.0)
            * Self::STORAGE_SAFETY_MARGIN)
            .max(0.001);
        Self {
            gpu_minutes,
            storage_gb,
            concurrent_jobs: units.max(1),
            is_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_tier_matches_the_source_table() {
        let q = UserQuota::new_for_tier("u1", UserTier::Default, Utc::now());
        assert_eq!(q.resource(ResourceKind::GpuMinutes).unwrap().limit, 60.0);
        assert_eq!(q.resource(ResourceKind::ConcurrentJobs).unwrap().limit, 2.0);
        assert_eq!(q.resource(ResourceKind::MonthlyJobs).unwrap().limit, 50.0);
    }

    #[test]
    fn estimate_floors_are_enforced() {
        let est = ResourceEstimate::from_units(0.0, 0.0, 1, false);
        assert_eq!(est.gpu_minutes, 0.1);
        assert_eq!(est.storage_gb, 0.001);
        assert_eq!(est.concurrent_jobs, 1);
    }

    #[test]
    fn reset_skipped_when_period_is_zero() {
        let now = Utc::now();
        let mut resource = QuotaResource {
            limit: 10.0,
            used: 5.0,
            reset_period_days: 0,
            last_reset_at: now - chrono::Duration::days(365),
            soft_limit_pct: 100.0,
        };
        assert!(!resource.should_reset(now));
        resource.reset_period_days = 30;
        assert!(resource.should_reset(now));
    }
}
