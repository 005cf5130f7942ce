//! # dog-dispatch: In-Process Priority Job Dispatch
//!
//! **A poll-driven dispatcher for fire-and-forget background work**
//!
//! dog-dispatch takes JSON work items, hands them to a caller-supplied
//! [`Processor`] under a concurrency bound and settles every item into a
//! terminal or retryable state:
//!
//! - **Priority ordering**: `high` before `normal` before `low`, FIFO within a priority
//! - **Retries with backoff**: `min(base * 2^(attempts - 1), max_backoff)`
//! - **Dead letter**: items that run out of attempts are parked as `undeliverable`
//! - **Deadlines**: every dispatch is supervised; overruns are cancelled and marked failed
//! - **Circuit breaking**: repeated processor failures pause dispatch for a cooldown
//! - **Stuck sweep**: a safety net for items left in `processing` by a lost timer
//! - **Events and stats**: instance-scoped event stream and processing counters
//!
//! Storage is pluggable through [`QueueBackend`]; [`MemoryBackend`] ships as the
//! reference implementation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_dispatch::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let adapter = QueueAdapter::new(MemoryBackend::new(), |item: QueueItem, ctx: ProcessContext| async move {
//!     println!("sending {} (attempt {})", item.payload, ctx.attempt);
//!     Ok::<_, ProcessError>(ProcessOutcome::Delivered)
//! });
//!
//! adapter
//!     .enqueue(json!({"to": "ops@example.com"}), EnqueueOptions::new().with_priority(Priority::High))
//!     .await?;
//!
//! adapter.start()?;
//! // ...
//! adapter.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod observability;
pub mod poller;
pub mod reaper;
pub mod types;

pub use adapter::{QueueAdapter, WorkerHandle};
pub use backend::QueueBackend;
pub use config::{BreakerConfig, QueueConfig};
pub use engine::{backoff_delay, QueueEngine, REASON_MAX_RETRIES};
pub use error::{CircuitError, ProcessError, QueueError, QueueResult};
pub use execution::{BreakerStats, CircuitBreaker, CircuitState, ProcessOutcome, Processor};
pub use poller::Poller;
pub use reaper::StuckReaper;
pub use types::{
    EnqueueOptions, ItemId, ItemMetadata, ItemStatus, Priority, ProcessContext,
    ProcessingCounts, QueueEvent, QueueItem, RetryCause,
};

// Backend implementations
#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

// Observability exports
pub use observability::{
    BoxStream, ErrorContext, EventHub, LiveMetrics, Monitor, QueueStats, TracingMonitor,
};

/// Everything a host needs to wire up a dispatcher
pub mod prelude {
    pub use crate::{
        EnqueueOptions, ItemId, ItemStatus, Priority, ProcessContext, ProcessError,
        ProcessOutcome, Processor, QueueAdapter, QueueBackend, QueueConfig, QueueError,
        QueueEvent, QueueItem, QueueResult, QueueStats,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    pub use async_trait::async_trait;
}
