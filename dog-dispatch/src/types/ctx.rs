use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ItemId;

/// Per-dispatch context handed to a processor alongside the item
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Item being processed
    pub item_id: ItemId,

    /// 1-based attempt number of this dispatch
    pub attempt: u32,

    /// Processing budget before the item is marked failed
    pub timeout: Duration,

    /// Cancelled when the deadline passes; cooperative processors should stop
    pub cancellation: CancellationToken,
}

impl ProcessContext {
    /// Create a new context with a fresh cancellation token
    pub fn new(item_id: ItemId, attempt: u32, timeout: Duration) -> Self {
        Self {
            item_id,
            attempt,
            timeout,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an existing cancellation token
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Check if the dispatch has been abandoned
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the dispatch has been abandoned
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}
