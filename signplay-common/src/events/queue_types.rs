//! Queue type definitions
//!
//! Supporting types for queue item lifecycle and progress reporting.

use serde::{Deserialize, Serialize};

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl QueueItemStatus {
    /// True once the item will not be attempted again
    pub fn is_finished(self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueItemStatus::Pending => write!(f, "pending"),
            QueueItemStatus::Processing => write!(f, "processing"),
            QueueItemStatus::Retrying => write!(f, "retrying"),
            QueueItemStatus::Completed => write!(f, "completed"),
            QueueItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-status item counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Accumulate counts from a sequence of statuses
    pub fn from_statuses(statuses: impl IntoIterator<Item = QueueItemStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                QueueItemStatus::Pending => counts.pending += 1,
                QueueItemStatus::Processing => counts.processing += 1,
                QueueItemStatus::Retrying => counts.retrying += 1,
                QueueItemStatus::Completed => counts.completed += 1,
                QueueItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Finished items (completed or failed)
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    /// Percentage of finished items, 0.0 for an empty queue
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.finished() as f64 / self.total as f64 * 100.0
    }
}
