use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::{
    backend::QueueBackend, EnqueueOptions, ItemId, ItemStatus, ProcessingCounts, QueueItem,
    QueueResult,
};

/// In-memory backend for single-process use and tests.
///
/// Cloning is cheap and yields a handle onto the same store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    /// Items indexed by id
    pub(crate) items: Arc<RwLock<HashMap<ItemId, QueueItem>>>,

    /// Persisted pause switch
    pub(crate) paused: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items, whatever their status
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, item: QueueItem) -> QueueResult<()> {
        debug!(item_id = %item.id, priority = %item.priority, "storing item");
        self.items.write().insert(item.id.clone(), item);
        Ok(())
    }

    async fn enqueue_once(
        &self,
        id: ItemId,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<bool> {
        // Check and insert under one write lock
        let mut items = self.items.write();
        if items.contains_key(&id) {
            return Ok(false);
        }

        let item = QueueItem::new(payload, options.with_id(id.clone()));
        items.insert(id, item);
        Ok(true)
    }

    async fn update_status(&self, id: &ItemId, status: ItemStatus) -> QueueResult<()> {
        if let Some(item) = self.items.write().get_mut(id) {
            item.metadata.status = status;
        }
        Ok(())
    }

    async fn complete(&self, id: &ItemId, success: bool) -> QueueResult<()> {
        if let Some(item) = self.items.write().get_mut(id) {
            item.metadata.status = if success {
                ItemStatus::Delivered
            } else {
                ItemStatus::Failed
            };
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: &ItemId, reason: &str) -> QueueResult<()> {
        if let Some(item) = self.items.write().get_mut(id) {
            item.metadata.status = ItemStatus::Undeliverable;
            item.metadata.reason = Some(reason.to_string());
            if item.metadata.error.is_none() {
                item.metadata.error = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn processing_counts(&self) -> QueueResult<ProcessingCounts> {
        let items = self.items.read();
        let mut counts = ProcessingCounts::default();
        for item in items
            .values()
            .filter(|item| item.metadata.status == ItemStatus::Processing)
        {
            counts.add(item.priority);
        }
        Ok(counts)
    }

    async fn find_stuck_processing(&self, since: DateTime<Utc>) -> QueueResult<Vec<QueueItem>> {
        let items = self.items.read();
        Ok(items
            .values()
            .filter(|item| {
                let started = item
                    .metadata
                    .last_attempt_at
                    .unwrap_or(item.metadata.queued_at);
                item.metadata.status == ItemStatus::Processing && started < since
            })
            .cloned()
            .collect())
    }

    async fn dequeue(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut items = self.items.write();

        let mut eligible: Vec<(ItemId, crate::Priority, DateTime<Utc>)> = items
            .values()
            .filter(|item| item.is_eligible(now))
            .map(|item| (item.id.clone(), item.priority, item.metadata.queued_at))
            .collect();
        eligible.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));
        eligible.truncate(limit);

        // Claim what we hand out so a second dequeue cannot return it
        let mut claimed = Vec::with_capacity(eligible.len());
        for (id, _, _) in eligible {
            if let Some(item) = items.get_mut(&id) {
                item.metadata.status = ItemStatus::Processing;
                item.metadata.last_attempt_at = Some(now);
                claimed.push(item.clone());
            }
        }

        Ok(claimed)
    }

    async fn dead_letter_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let items = self.items.read();
        let mut dead: Vec<QueueItem> = items
            .values()
            .filter(|item| item.metadata.status == ItemStatus::Undeliverable)
            .cloned()
            .collect();
        dead.sort_by_key(|item| item.metadata.queued_at);
        dead.truncate(limit);
        Ok(dead)
    }

    async fn get_item(&self, id: &ItemId) -> QueueResult<Option<QueueItem>> {
        Ok(self.items.read().get(id).cloned())
    }

    async fn pause(&self) -> QueueResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> QueueResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_paused(&self) -> QueueResult<bool> {
        Ok(self.paused.load(Ordering::SeqCst))
    }
}

/// Test helpers for deterministic testing
impl MemoryBackend {
    /// Pretend the item's current attempt started at `at` (test helper)
    pub fn backdate_last_attempt(&self, id: &ItemId, at: DateTime<Utc>) {
        if let Some(item) = self.items.write().get_mut(id) {
            item.metadata.last_attempt_at = Some(at);
        }
    }

    /// Rewrite the enqueue timestamp (test helper)
    pub fn set_queued_at(&self, id: &ItemId, at: DateTime<Utc>) {
        if let Some(item) = self.items.write().get_mut(id) {
            item.metadata.queued_at = at;
        }
    }
}
