//! Shared application state, assembled once at startup and cloned (as an
//! `Arc`-backed handle) into every request handler via `axum::State`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use omtx_aggregator::BatchAggregator;
use omtx_dispatch::{DispatcherConfig, TaskDispatcher};
use omtx_job_store::JobStore;
use omtx_quota::QuotaManager;
use omtx_ratelimit::RateLimiterService;
use omtx_storage_gateway::StorageGateway;
use omtx_types::quota::UserTier;

use crate::config::AppConfig;

/// Bounds the Completion Handler's duplicate-suppression set (spec:
/// "bounded in-memory set, <= 10 000 entries with recency-based
/// eviction"). Tracked as an insertion-ordered ring via `order`.
pub struct ProcessedCallIds {
    seen: DashMap<String, ()>,
    order: tokio::sync::Mutex<std::collections::VecDeque<String>>,
    capacity: usize,
}

impl ProcessedCallIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: DashMap::new(),
            order: tokio::sync::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns `true` if `call_id` was already processed (the caller
    /// should short-circuit); otherwise marks it processed and evicts
    /// the oldest entry if the set is now over capacity.
    pub async fn check_and_insert(&self, call_id: &str) -> bool {
        if self.seen.contains_key(call_id) {
            return true;
        }
        self.seen.insert(call_id.to_string(), ());
        let mut order = self.order.lock().await;
        order.push_back(call_id.to_string());
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub job_store: Arc<JobStore>,
    pub storage: Arc<StorageGateway>,
    pub quota: Arc<QuotaManager>,
    pub rate_limiter: Arc<RateLimiterService>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub aggregator: Arc<BatchAggregator>,
    pub processed_calls: Arc<ProcessedCallIds>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            job_store: self.job_store.clone(),
            storage: self.storage.clone(),
            quota: self.quota.clone(),
            rate_limiter: self.rate_limiter.clone(),
            dispatcher: self.dispatcher.clone(),
            aggregator: self.aggregator.clone(),
            processed_calls: self.processed_calls.clone(),
            started_at: self.started_at,
        }
    }
}

impl AppState {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(StorageGateway::new(Arc::new(
            omtx_storage_gateway::S3ObjectStore::from_env(config.bucket_name.clone()).await,
        )));

        let job_backend = Arc::new(
            omtx_job_store::DynamoDbBackend::from_env(format!("{}-jobs", config.project_id)).await,
        );
        let job_store = Arc::new(JobStore::new(job_backend, storage.clone()));

        let redis_pool = build_redis_pool(&config.redis_url);
        if redis_pool.is_none() {
            tracing::warn!(redis_url = %config.redis_url, "could not build redis pool, quota/rate-limit fail open to in-process state");
        }

        let quota = Arc::new(QuotaManager::new(redis_pool.clone()));
        let rate_limiter = Arc::new(RateLimiterService::new(redis_pool));

        let dispatcher = Arc::new(TaskDispatcher::new(DispatcherConfig {
            worker_url: config.worker_url.clone(),
            service_account: config.service_account.clone(),
            signing_secret: config.service_account.clone().into_bytes(),
            interactive_cap: config.lane_interactive_cap,
            bulk_cap: config.lane_bulk_cap,
        }));

        let aggregator = Arc::new(BatchAggregator::new(job_store.clone(), storage.clone()));

        info!(project_id = %config.project_id, bucket = %config.bucket_name, "application state assembled");

        Ok(Self {
            config,
            job_store,
            storage,
            quota,
            rate_limiter,
            dispatcher,
            aggregator,
            processed_calls: Arc::new(ProcessedCallIds::new(10_000)),
            started_at: chrono::Utc::now(),
        })
    }

    /// Looks up a principal's quota tier. There is no separate user
    /// directory in this service; every principal gets the configured
    /// default tier. Per-user overrides would plug in here.
    pub fn tier_for(&self, _user_id: &str) -> UserTier {
        match self.config.default_tier.as_str() {
            "premium" => UserTier::Premium,
            "enterprise" => UserTier::Enterprise,
            "admin" => UserTier::Admin,
            _ => UserTier::Default,
        }
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(30)
    }
}

fn build_redis_pool(url: &str) -> Option<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config::from_url(url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}
