use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{EnqueueOptions, ItemId, Priority};
use crate::QueueResult;

/// Item status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting to be dispatched
    Queued,

    /// Claimed by the dispatcher and handed to a processor
    Processing,

    /// Processed successfully
    Delivered,

    /// Timed out or found stuck; waits for a re-queue or manual dead-lettering
    Failed,

    /// Retries exhausted, parked in the dead letter
    Undeliverable,

    /// Cancelled by the host
    Cancelled,
}

impl ItemStatus {
    /// Check if the item is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Undeliverable | Self::Cancelled)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Undeliverable => "undeliverable",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mutable lifecycle state stored alongside every item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Funneled processing failures so far
    pub attempts: u32,

    /// Current status
    pub status: ItemStatus,

    /// When the item was enqueued
    pub queued_at: DateTime<Utc>,

    /// When the item was last claimed for processing
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Not eligible for dequeue before this instant
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Never dequeued at or after this instant
    pub expires_at: Option<DateTime<Utc>>,

    /// Last error reported by the processor
    pub error: Option<String>,

    /// Why the item was dead-lettered
    pub reason: Option<String>,
}

impl ItemMetadata {
    /// Fresh metadata for a newly queued item
    pub fn queued(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            status: ItemStatus::Queued,
            queued_at: now,
            last_attempt_at: None,
            next_attempt_at: None,
            expires_at: None,
            error: None,
            reason: None,
        }
    }
}

/// A unit of work with priority, opaque payload and lifecycle metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item identifier
    pub id: ItemId,

    /// Dispatch priority
    pub priority: Priority,

    /// Opaque payload handed to the processor
    pub payload: Value,

    /// Lifecycle state
    pub metadata: ItemMetadata,
}

impl QueueItem {
    /// Create a queued item from a payload and enqueue options
    pub fn new(payload: Value, options: EnqueueOptions) -> Self {
        let now = Utc::now();
        let mut metadata = ItemMetadata::queued(now);
        metadata.expires_at = options.expires_at;
        metadata.next_attempt_at = options.available_at;

        Self {
            id: options.id.unwrap_or_default(),
            priority: options.priority,
            payload,
            metadata,
        }
    }

    /// Current status
    pub fn status(&self) -> ItemStatus {
        self.metadata.status
    }

    /// Check if the item may be handed out by dequeue at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.metadata.status == ItemStatus::Queued
            && self.metadata.next_attempt_at.map_or(true, |at| at <= now)
            && !self.is_expired(now)
    }

    /// Check if the item expired at or before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.metadata.expires_at.map_or(false, |at| at <= now)
    }

    /// Decode the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
