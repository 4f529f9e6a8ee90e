//! Temp-write → validate → finalize protocol.
//!
//! A [`StorageTransaction`] batches writes under a scratch prefix
//! (`temp/{txn_id}/...`), all written with [`StorageGateway::stage`]. Only
//! [`StorageGateway::commit`] copies them to their real destinations; any
//! failure before that point is a no-op against the canonical tree, and
//! [`StorageGateway::rollback`] cleans up whatever was staged.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use omtx_types::paths;

#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub temp_key: String,
    pub final_key: String,
    pub content_type: &'static str,
}

pub struct StorageTransaction {
    pub id: String,
    pub(crate) staged: Vec<StagedWrite>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) committed: bool,
    pub(crate) rolled_back: bool,
}

impl StorageTransaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            staged: Vec::new(),
            started_at: Utc::now(),
            committed: false,
            rolled_back: false,
        }
    }

    pub(crate) fn temp_key_for(&self, final_key: &str) -> String {
        paths::temp_path(&self.id, final_key)
    }

    pub fn is_open(&self) -> bool {
        !self.committed && !self.rolled_back
    }

    pub fn staged_final_keys(&self) -> Vec<&str> {
        self.staged.iter().map(|s| s.final_key.as_str()).collect()
    }
}

impl Default for StorageTransaction {
    fn default() -> Self {
        Self::new()
    }
}
