use tracing::error;

use crate::{ItemId, Priority, ProcessError};

/// Where a reported error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub item_id: ItemId,
    pub priority: Priority,
    /// Attempt count after this failure was funneled
    pub attempts: u32,
}

/// Error-tracking collaborator.
///
/// Called for errors returned by processors only, never for explicit
/// [`ProcessOutcome::Failed`](crate::ProcessOutcome::Failed) results.
pub trait Monitor: Send + Sync + 'static {
    fn track_error(&self, error: &ProcessError, ctx: &ErrorContext);
}

/// Default monitor: reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn track_error(&self, err: &ProcessError, ctx: &ErrorContext) {
        error!(
            item_id = %ctx.item_id,
            priority = %ctx.priority,
            attempts = ctx.attempts,
            error = %err,
            "processor error"
        );
    }
}
