use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative progress reported to an observer after each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub processed: usize,
    pub total: usize,
}

/// Aggregate outcome of one sync run. Per-source and per-location failures are
/// converted into counters here rather than aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub events_seen: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duplicates: usize,
    pub sources_failed: usize,
    pub locations_failed: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            events_seen: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            duplicates: 0,
            sources_failed: 0,
            locations_failed: 0,
            started_at,
            duration_ms: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.sources_failed == 0 && self.locations_failed == 0
    }
}
