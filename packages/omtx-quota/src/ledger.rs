//! Quota persistence: a Redis hash (`quota:{user_id}`, one field per
//! resource) when Redis is reachable, a [`DashMap`] otherwise. Every read
//! and write tries Redis first and falls back silently — the quota
//! system fails open rather than blocking submission on a KV outage.

use chrono::Utc;
use dashmap::DashMap;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use tracing::warn;

use omtx_types::quota::{ResourceKind, UserQuota, UserTier};

use crate::metrics::QuotaMetrics;

/// ~32 days, matching the cumulative resources' own reset window so a
/// quota key never outlives the counters it's tracking.
const QUOTA_KEY_TTL_SECS: i64 = 32 * 24 * 60 * 60;

pub struct QuotaLedger {
    redis: Option<Pool>,
    fallback: DashMap<String, UserQuota>,
}

impl QuotaLedger {
    pub fn new(redis: Option<Pool>) -> Self {
        Self {
            redis,
            fallback: DashMap::new(),
        }
    }

    fn redis_key(user_id: &str) -> String {
        format!("quota:{user_id}")
    }

    /// Loads a user's quota, initializing a fresh one at `tier` if none
    /// exists yet, and sweeping any resources whose reset window elapsed.
    pub async fn load_or_init(
        &self,
        user_id: &str,
        tier: UserTier,
        metrics: &QuotaMetrics,
    ) -> UserQuota {
        metrics.quota_checks.fetch_add(0, std::sync::atomic::Ordering::Relaxed);

        let mut quota = if let Some(pool) = &self.redis {
            match self.load_from_redis(pool, user_id).await {
                Ok(Some(q)) => q,
                Ok(None) => UserQuota::new_for_tier(user_id, tier, Utc::now()),
                Err(e) => {
                    warn!(user_id, error = %e, "redis quota load failed, using fallback store");
                    QuotaMetrics::inc(&metrics.redis_errors);
                    QuotaMetrics::inc(&metrics.fallback_used);
                    self.load_from_fallback(user_id, tier)
                }
            }
        } else {
            QuotaMetrics::inc(&metrics.fallback_used);
            self.load_from_fallback(user_id, tier)
        };

        let reset_count = quota.sweep_resets(Utc::now());
        if reset_count > 0 {
            metrics
                .quotas_reset
                .fetch_add(reset_count as u64, std::sync::atomic::Ordering::Relaxed);
        }

        quota
    }

    fn load_from_fallback(&self, user_id: &str, tier: UserTier) -> UserQuota {
        self.fallback
            .entry(user_id.to_string())
            .or_insert_with(|| UserQuota::new_for_tier(user_id, tier, Utc::now()))
            .clone()
    }

    async fn load_from_redis(&self, pool: &Pool, user_id: &str) -> crate::error::Result<Option<UserQuota>> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| crate::error::QuotaError::Redis(e.to_string()))?;
        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(Self::redis_key(user_id))
            .await
            .map_err(|e| crate::error::QuotaError::Redis(e.to_string()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        let tier_str = fields.get("__tier").cloned().unwrap_or_default();
        let tier = match tier_str.as_str() {
            "premium" => UserTier::Premium,
            "enterprise" => UserTier::Enterprise,
            "admin" => UserTier::Admin,
            _ => UserTier::Default,
        };
        let mut quota = UserQuota::new_for_tier(user_id, tier, Utc::now());
        for kind in ResourceKind::ALL {
            if let Some(raw) = fields.get(kind.as_str()) {
                if let Ok(resource) = serde_json::from_str(raw) {
                    quota.resources.insert(kind, resource);
                }
            }
        }
        Ok(Some(quota))
    }

    /// Persists the full resource set. On Redis failure the fallback map
    /// is updated instead so subsequent reads in this process still see
    /// the reservation, even though it won't survive a restart.
    pub async fn save(&self, quota: &UserQuota, metrics: &QuotaMetrics) {
        if let Some(pool) = &self.redis {
            match self.save_to_redis(pool, quota).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(user_id = %quota.user_id, error = %e, "redis quota save failed, using fallback store");
                    QuotaMetrics::inc(&metrics.redis_errors);
                    QuotaMetrics::inc(&metrics.fallback_used);
                }
            }
        }
        self.fallback.insert(quota.user_id.clone(), quota.clone());
    }

    async fn save_to_redis(&self, pool: &Pool, quota: &UserQuota) -> crate::error::Result<()> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| crate::error::QuotaError::Redis(e.to_string()))?;
        let tier_str = match quota.tier {
            UserTier::Default => "default",
            UserTier::Premium => "premium",
            UserTier::Enterprise => "enterprise",
            UserTier::Admin => "admin",
        };
        let mut pairs: Vec<(String, String)> = vec![("__tier".to_string(), tier_str.to_string())];
        for (kind, resource) in &quota.resources {
            pairs.push((kind.as_str().to_string(), serde_json::to_string(resource)?));
        }
        let key = Self::redis_key(&quota.user_id);
        let _: () = conn
            .hset_multiple(&key, &pairs)
            .await
            .map_err(|e| crate::error::QuotaError::Redis(e.to_string()))?;
        let _: () = conn
            .expire(&key, QUOTA_KEY_TTL_SECS)
            .await
            .map_err(|e| crate::error::QuotaError::Redis(e.to_string()))?;
        Ok(())
    }
}
