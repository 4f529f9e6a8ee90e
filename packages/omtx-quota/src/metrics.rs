use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters for the quota manager, surfaced on `/api/v1/system/status`.
#[derive(Default)]
pub struct QuotaMetrics {
    pub quota_checks: AtomicU64,
    pub quota_violations: AtomicU64,
    pub quotas_reset: AtomicU64,
    pub redis_errors: AtomicU64,
    pub fallback_used: AtomicU64,
}

impl QuotaMetrics {
    pub fn snapshot(&self) -> QuotaMetricsSnapshot {
        QuotaMetricsSnapshot {
            quota_checks: self.quota_checks.load(Ordering::Relaxed),
            quota_violations: self.quota_violations.load(Ordering::Relaxed),
            quotas_reset: self.quotas_reset.load(Ordering::Relaxed),
            redis_errors: self.redis_errors.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaMetricsSnapshot {
    pub quota_checks: u64,
    pub quota_violations: u64,
    pub quotas_reset: u64,
    pub redis_errors: u64,
    pub fallback_used: u64,
}
