//! Read-through TTL cache in front of the document backend.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use omtx_types::job::JobRecord;

struct Entry {
    record: JobRecord,
    expires_at: Instant,
}

pub struct JobCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl JobCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        let entry = self.entries.get(job_id)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(job_id);
            return None;
        }
        Some(entry.record.clone())
    }

    pub fn put(&self, record: JobRecord) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(record.id.clone(), Entry { record, expires_at });
    }

    pub fn invalidate(&self, job_id: &str) {
        self.entries.remove(job_id);
    }
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omtx_types::job::JobType;

    fn sample(id: &str) -> JobRecord {
        JobRecord::new(id.into(), JobType::Individual, "t", "boltz2", "u1", serde_json::json!({}))
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = JobCache::new(Duration::from_millis(1));
        cache.put(sample("j1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("j1").is_none());
    }

    #[test]
    fn invalidate_drops_the_entry_immediately() {
        let cache = JobCache::default();
        cache.put(sample("j2"));
        assert!(cache.get("j2").is_some());
        cache.invalidate("j2");
        assert!(cache.get("j2").is_none());
    }
}
