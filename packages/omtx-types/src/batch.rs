//! Batch progress counters, embedded on a batch parent's job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress counters for a batch parent. `completed + failed + cancelled
/// == total` iff the parent is terminal (spec §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub percentage: f64,
    pub success_rate: f64,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            pending: total,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            percentage: 0.0,
            success_rate: 0.0,
            updated_at: Utc::now(),
            estimated_completion_at: None,
        }
    }

    fn terminal_count(&self) -> u32 {
        self.completed + self.failed + self.cancelled
    }

    /// True once every child has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.terminal_count() >= self.total
    }

    /// Recomputes `percentage` and `success_rate` from the counters. Called
    /// after every counter mutation so the two never drift out of sync.
    pub fn recompute(&mut self) {
        if self.total == 0 {
            self.percentage = 100.0;
            self.success_rate = 0.0;
            self.updated_at = Utc::now();
            return;
        }
        let done = self.terminal_count();
        self.percentage = (done as f64 / self.total as f64) * 100.0;
        self.success_rate = if done > 0 {
            (self.completed as f64 / done as f64) * 100.0
        } else {
            0.0
        };
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self) {
        if self.pending > 0 {
            self.pending -= 1;
        }
        self.running += 1;
        self.recompute();
    }

    pub fn mark_completed(&mut self) {
        if self.running > 0 {
            self.running -= 1;
        } else if self.pending > 0 {
            self.pending -= 1;
        }
        self.completed += 1;
        self.recompute();
    }

    pub fn mark_failed(&mut self) {
        if self.running > 0 {
            self.running -= 1;
        } else if self.pending > 0 {
            self.pending -= 1;
        }
        self.failed += 1;
        self.recompute();
    }

    pub fn mark_cancelled(&mut self) {
        if self.running > 0 {
            self.running -= 1;
        } else if self.pending > 0 {
            self.pending -= 1;
        }
        self.cancelled += 1;
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_sum_to_total_once_terminal() {
        let mut p = BatchProgress::new(3);
        p.mark_running();
        p.mark_completed();
        p.mark_running();
        p.mark_completed();
        p.mark_running();
        p.mark_failed();
        assert!(p.is_complete());
        assert_eq!(p.completed + p.failed + p.cancelled, p.total);
        assert!((p.success_rate - 66.666_666_666_666_66).abs() < 1e-6);
    }

    #[test]
    fn empty_batch_is_not_a_divide_by_zero() {
        let mut p = BatchProgress::new(0);
        p.recompute();
        assert_eq!(p.percentage, 100.0);
    }
}
