use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ItemId;

/// Duration samples kept for the rolling average
const MAX_SAMPLES: usize = 1000;

/// Snapshot returned by `stats()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Distinct items that finished at least one processing attempt
    pub total_processed: u64,
    /// Funneled failures, counted per occurrence
    pub total_errors: u64,
    /// Mean duration of recent processing attempts
    pub average_processing_time: Duration,
    /// Items currently in flight
    pub currently_processing: usize,
}

/// Live counters for the engine
#[derive(Debug, Default)]
pub struct LiveMetrics {
    processed_ids: Mutex<HashSet<ItemId>>,
    total_errors: AtomicU64,
    durations: Mutex<VecDeque<Duration>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an item as processed; repeats of the same id are ignored
    pub fn record_processed(&self, id: &ItemId) -> bool {
        let mut ids = self.processed_ids.lock();
        if ids.contains(id) {
            false
        } else {
            ids.insert(id.clone())
        }
    }

    pub fn increment_errors(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one processing attempt took
    pub fn record_duration(&self, duration: Duration) {
        let mut durations = self.durations.lock();
        durations.push_back(duration);

        // Keep only the most recent samples
        if durations.len() > MAX_SAMPLES {
            durations.pop_front();
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.processed_ids.lock().len() as u64
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Mean of the recorded samples, zero when there are none
    pub fn average_processing_time(&self) -> Duration {
        let durations = self.durations.lock();
        if durations.is_empty() {
            return Duration::ZERO;
        }

        let total: Duration = durations.iter().sum();
        total / durations.len() as u32
    }

    /// Build a stats snapshot with the caller's in-flight count
    pub fn snapshot(&self, currently_processing: usize) -> QueueStats {
        QueueStats {
            total_processed: self.total_processed(),
            total_errors: self.total_errors(),
            average_processing_time: self.average_processing_time(),
            currently_processing,
        }
    }
}
