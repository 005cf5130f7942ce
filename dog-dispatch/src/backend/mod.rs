#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    EnqueueOptions, ItemId, ItemStatus, ProcessingCounts, QueueItem, QueueResult,
};

/// Storage primitives the dispatcher depends on.
///
/// Durability, transactional strength and query efficiency are up to the
/// implementation. Implementations shared across threads must make the
/// check-then-insert of [`enqueue_once`](Self::enqueue_once) and the
/// filter-then-claim of [`dequeue`](Self::dequeue) atomic.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert or overwrite an item by id
    async fn enqueue(&self, item: QueueItem) -> QueueResult<()>;

    /// Insert a queued item unless the id already exists.
    /// Returns `false` without touching the store when it does.
    async fn enqueue_once(
        &self,
        id: ItemId,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<bool>;

    /// Set the status field only; no-op for unknown ids
    async fn update_status(&self, id: &ItemId, status: ItemStatus) -> QueueResult<()>;

    /// Settle an item: `true` marks it delivered, `false` marks it failed
    async fn complete(&self, id: &ItemId, success: bool) -> QueueResult<()>;

    /// Park an item in the dead letter with the given reason
    async fn move_to_dead_letter(&self, id: &ItemId, reason: &str) -> QueueResult<()>;

    /// Items in `processing`, grouped by priority
    async fn processing_counts(&self) -> QueueResult<ProcessingCounts>;

    /// Items in `processing` whose last attempt started before `since`
    async fn find_stuck_processing(&self, since: DateTime<Utc>) -> QueueResult<Vec<QueueItem>>;

    /// Claim up to `limit` eligible items, ordered by priority then enqueue time
    async fn dequeue(&self, limit: usize) -> QueueResult<Vec<QueueItem>>;

    /// Undeliverable items, at most `limit`
    async fn dead_letter_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>>;

    /// Point lookup
    async fn get_item(&self, id: &ItemId) -> QueueResult<Option<QueueItem>>;

    /// Set the persisted pause flag
    async fn pause(&self) -> QueueResult<()>;

    /// Clear the persisted pause flag
    async fn resume(&self) -> QueueResult<()>;

    /// Read the persisted pause flag
    async fn is_paused(&self) -> QueueResult<bool>;
}
