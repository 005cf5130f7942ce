use serde::{Deserialize, Serialize};

use super::Priority;

/// Items currently in `processing`, grouped by priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl ProcessingCounts {
    /// Count one more item of the given priority
    pub fn add(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Normal => self.normal += 1,
            Priority::Low => self.low += 1,
        }
    }

    /// Count for one priority tier
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}
