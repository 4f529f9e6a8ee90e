//! Token-bucket admission control, keyed by `(principal, route class)`.
//!
//! Buckets live in Redis for cross-instance consistency; a `governor`
//! keyed rate limiter backs an in-memory fallback so a KV outage
//! degrades to per-instance limiting instead of blocking admission.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use governor::{Quota, RateLimiter};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use tracing::warn;

/// The three admission tiers named in the submission API: tight limits on
/// writes, loose limits on reads, and a medium tier for artifact
/// downloads/exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Submit,
    Read,
    Download,
}

impl RouteClass {
    fn burst(self) -> u32 {
        match self {
            RouteClass::Submit => 5,
            RouteClass::Read => 60,
            RouteClass::Download => 20,
        }
    }

    fn window_secs(self) -> u64 {
        10
    }

    fn as_str(self) -> &'static str {
        match self {
            RouteClass::Submit => "submit",
            RouteClass::Read => "read",
            RouteClass::Download => "download",
        }
    }
}

pub struct Decision {
    pub allowed: bool,
    pub retry_after: Duration,
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct RateLimiterService {
    redis: Option<Pool>,
    local: DashMap<RouteClass, Arc<KeyedLimiter>>,
    fallback_used: std::sync::atomic::AtomicU64,
}

impl RateLimiterService {
    pub fn new(redis: Option<Pool>) -> Self {
        Self {
            redis,
            local: DashMap::new(),
            fallback_used: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn fallback_used(&self) -> u64 {
        self.fallback_used.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn local_limiter_for(&self, class: RouteClass) -> Arc<KeyedLimiter> {
        self.local
            .entry(class)
            .or_insert_with(|| {
                let burst = NonZeroU32::new(class.burst()).expect("route burst is non-zero");
                Arc::new(RateLimiter::keyed(Quota::per_second(burst).allow_burst(burst)))
            })
            .clone()
    }

    /// Attempts to consume one token for `principal` under `class`. Tries
    /// the Redis bucket first; on any Redis error falls back to the local
    /// `governor` limiter and counts it.
    pub async fn check(&self, principal: &str, class: RouteClass) -> Decision {
        if let Some(pool) = &self.redis {
            match self.check_redis(pool, principal, class).await {
                Ok(decision) => return decision,
                Err(e) => {
                    warn!(principal, class = class.as_str(), error = %e, "redis rate-limit check failed, using local fallback");
                    self.fallback_used.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        } else {
            self.fallback_used.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        let limiter = self.local_limiter_for(class);
        match limiter.check_key(&principal.to_string()) {
            Ok(()) => Decision {
                allowed: true,
                retry_after: Duration::ZERO,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Decision {
                    allowed: false,
                    retry_after: wait,
                }
            }
        }
    }

    /// Fixed-window counter in Redis: `INCR` a key scoped to the current
    /// window, set its expiry on first use, and compare to the class
    /// burst. Simpler than a true sliding window, matches the KV-backed
    /// buckets' job elsewhere in this service (quota ledger uses the same
    /// increment-and-expire shape).
    async fn check_redis(
        &self,
        pool: &Pool,
        principal: &str,
        class: RouteClass,
    ) -> Result<Decision, deadpool_redis::redis::RedisError> {
        let mut conn = pool.get().await.map_err(|e| {
            deadpool_redis::redis::RedisError::from((
                deadpool_redis::redis::ErrorKind::IoError,
                "pool checkout failed",
                e.to_string(),
            ))
        })?;

        let window = chrono::Utc::now().timestamp() as u64 / class.window_secs();
        let key = format!("ratelimit:{}:{}:{}", class.as_str(), principal, window);

        let count: u64 = conn.incr(&key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(&key, class.window_secs() as i64).await?;
        }

        if count <= class.burst() as u64 {
            Ok(Decision {
                allowed: true,
                retry_after: Duration::ZERO,
            })
        } else {
            let ttl: i64 = conn.ttl(&key).await.unwrap_or(class.window_secs() as i64);
            Ok(Decision {
                allowed: false,
                retry_after: Duration::from_secs(ttl.max(0) as u64),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fallback_allows_up_to_the_burst_then_refuses() {
        let svc = RateLimiterService::new(None);
        let mut allowed_count = 0;
        for _ in 0..10 {
            let decision = svc.check("user-1", RouteClass::Submit).await;
            if decision.allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 5);
        assert!(svc.fallback_used() > 0);
    }

    #[tokio::test]
    async fn distinct_principals_get_independent_buckets() {
        let svc = RateLimiterService::new(None);
        for _ in 0..5 {
            assert!(svc.check("user-a", RouteClass::Submit).await.allowed);
        }
        assert!(svc.check("user-b", RouteClass::Submit).await.allowed);
    }
}
