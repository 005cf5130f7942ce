use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, Priority};

/// Enqueue options - everything about an item except its payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Caller-chosen identity (generated when absent)
    pub id: Option<ItemId>,

    /// Dispatch priority
    pub priority: Priority,

    /// Drop the item from dequeue results from this instant on
    pub expires_at: Option<DateTime<Utc>>,

    /// Do not dispatch before this instant
    pub available_at: Option<DateTime<Utc>>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the item identity
    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the expiry instant
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Delay the first dispatch until `available_at`
    pub fn with_available_at(mut self, available_at: DateTime<Utc>) -> Self {
        self.available_at = Some(available_at);
        self
    }
}
