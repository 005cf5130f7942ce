use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// Why an item went back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCause {
    /// The processor failed; an attempt was consumed
    Failure,

    /// The circuit breaker rejected the call; no attempt was consumed
    CircuitOpen,
}

/// Lifecycle notifications raised by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Item processed successfully
    ItemDelivered {
        item_id: ItemId,
        attempts: u32,
        at: DateTime<Utc>,
    },

    /// Item re-queued with a retry gate
    ItemRetryScheduled {
        item_id: ItemId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        cause: RetryCause,
        at: DateTime<Utc>,
    },

    /// Item moved to the dead letter
    ItemUndeliverable {
        item_id: ItemId,
        attempts: u32,
        reason: String,
        error: Option<String>,
        at: DateTime<Utc>,
    },

    /// Processing outlived its deadline
    ItemTimeout {
        item_id: ItemId,
        timeout_ms: u64,
        at: DateTime<Utc>,
    },

    /// Sweep found the item stuck in processing
    ItemStuck {
        item_id: ItemId,
        last_attempt_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ItemDelivered { .. } => "itemDelivered",
            Self::ItemRetryScheduled { .. } => "itemRetryScheduled",
            Self::ItemUndeliverable { .. } => "itemUndeliverable",
            Self::ItemTimeout { .. } => "itemTimeout",
            Self::ItemStuck { .. } => "itemStuck",
        }
    }

    /// Get the item ID from any event
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::ItemDelivered { item_id, .. }
            | Self::ItemRetryScheduled { item_id, .. }
            | Self::ItemUndeliverable { item_id, .. }
            | Self::ItemTimeout { item_id, .. }
            | Self::ItemStuck { item_id, .. } => item_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::ItemDelivered { at, .. }
            | Self::ItemRetryScheduled { at, .. }
            | Self::ItemUndeliverable { at, .. }
            | Self::ItemTimeout { at, .. }
            | Self::ItemStuck { at, .. } => at,
        }
    }
}
