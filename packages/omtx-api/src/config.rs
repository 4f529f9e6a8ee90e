//! Startup configuration, loaded from the environment via the `config`
//! crate. Every field here mirrors a published `OMTX_*` variable; there
//! is no config file support, unlike the teacher's desktop-facing
//! settings loader — this service only ever runs inside a container.

use serde::Deserialize;

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_stuck_threshold() -> u64 {
    3600
}

fn default_tier() -> String {
    "default".to_string()
}

fn default_interactive_cap() -> usize {
    4
}

fn default_bulk_cap() -> usize {
    12
}

fn default_port() -> u16 {
    8080
}

fn default_dev_auth() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    // project_id/bucket_name/... below are required; optional fields carry
    // serde defaults matching the published OMTX_* env var defaults.
    pub project_id: String,
    pub bucket_name: String,
    pub task_queue_project: String,
    pub task_queue_region: String,
    pub worker_url: String,
    pub service_account: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_tier")]
    pub default_tier: String,
    #[serde(default = "default_interactive_cap")]
    pub lane_interactive_cap: usize,
    #[serde(default = "default_bulk_cap")]
    pub lane_bulk_cap: usize,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_dev_auth")]
    pub dev_auth: bool,
}

impl AppConfig {
    /// Loads configuration from `OMTX_*` environment variables. Missing
    /// required fields fail startup with the `config` crate's own
    /// descriptive deserialization error rather than a panic.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("OMTX")
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_vars_fail_with_a_descriptive_error() {
        for key in [
            "OMTX_PROJECT_ID",
            "OMTX_BUCKET_NAME",
            "OMTX_TASK_QUEUE_PROJECT",
            "OMTX_TASK_QUEUE_REGION",
            "OMTX_WORKER_URL",
            "OMTX_SERVICE_ACCOUNT",
            "OMTX_REDIS_URL",
        ] {
            std::env::remove_var(key);
        }
        assert!(AppConfig::from_env().is_err());
    }
}
