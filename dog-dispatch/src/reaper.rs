use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{backend::QueueBackend, engine::QueueEngine, QueueResult};

/// Periodic stuck-item sweep.
///
/// Safety net for dispatches whose in-process deadline timer was lost, e.g.
/// across a crash and restart against a durable backend.
pub struct StuckReaper<B: QueueBackend> {
    engine: QueueEngine<B>,
    interval: Duration,
}

impl<B: QueueBackend + 'static> StuckReaper<B> {
    /// Create a reaper using the engine's configured interval
    pub fn new(engine: QueueEngine<B>) -> Self {
        let interval = engine.config().stuck_check_interval;
        Self { engine, interval }
    }

    /// Create reaper with custom interval
    pub fn with_interval(engine: QueueEngine<B>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Sweep until `shutdown` fires. The first sweep happens one interval in.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> QueueResult<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_ms = self.interval.as_millis() as u64, "stuck reaper started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.reap_once().await {
                        Ok(0) => debug!("no stuck items found"),
                        Ok(count) => info!(count, "marked stuck items failed"),
                        Err(e) => warn!(error = %e, "stuck sweep failed"),
                    }
                }
            }
        }

        info!("stuck reaper stopped");
        Ok(())
    }

    /// Run one sweep
    pub async fn reap_once(&self) -> QueueResult<usize> {
        self.engine.sweep_stuck().await
    }
}
