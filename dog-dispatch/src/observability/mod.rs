pub mod hub;
pub mod metrics;
pub mod monitor;

#[cfg(feature = "tracing-basic")]
pub mod logging;

pub use hub::{BoxStream, EventHub};
pub use metrics::{LiveMetrics, QueueStats};
pub use monitor::{ErrorContext, Monitor, TracingMonitor};
