use std::future::Future;

use async_trait::async_trait;

use crate::{ProcessContext, ProcessError, QueueItem};

/// Resolved result of a processor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Work done; the item is marked delivered
    Delivered,

    /// Work rejected without an error; the item goes through the retry path
    Failed,
}

impl ProcessOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl From<bool> for ProcessOutcome {
    fn from(success: bool) -> Self {
        if success {
            Self::Delivered
        } else {
            Self::Failed
        }
    }
}

/// Caller-supplied processing capability.
///
/// Delivery is at-least-once: timeouts and stuck sweeps can lead to the same
/// item being handed over again, so implementations must tolerate repeats.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Process one item
    async fn process(
        &self,
        item: QueueItem,
        ctx: ProcessContext,
    ) -> Result<ProcessOutcome, ProcessError>;
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(QueueItem, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProcessOutcome, ProcessError>> + Send + 'static,
{
    async fn process(
        &self,
        item: QueueItem,
        ctx: ProcessContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        (self)(item, ctx).await
    }
}
