use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
    backend::QueueBackend, engine::QueueEngine, execution::Processor, ItemStatus, QueueResult,
};

/// Poll-dispatch loop.
///
/// Every `poll_interval` it dequeues as many items as there are free
/// concurrency permits and hands each one to the engine on its own task.
/// Rescheduling is time-based. A permit is held until the dispatch settles,
/// either by the processor returning or by its deadline passing, in which
/// case the processor is abandoned and the slot is reused.
pub struct Poller<B: QueueBackend> {
    engine: QueueEngine<B>,
    processor: Arc<dyn Processor>,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
}

impl<B: QueueBackend> Clone for Poller<B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            processor: self.processor.clone(),
            poll_interval: self.poll_interval,
            permits: self.permits.clone(),
        }
    }
}

impl<B: QueueBackend + 'static> Poller<B> {
    pub fn new(engine: QueueEngine<B>, processor: Arc<dyn Processor>) -> Self {
        let poll_interval = engine.config().poll_interval;
        let permits = Arc::new(Semaphore::new(engine.config().max_concurrent));
        Self {
            engine,
            processor,
            poll_interval,
            permits,
        }
    }

    /// Free dispatch slots
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a single poll cycle. Returns how many items were dispatched.
    ///
    /// Storage errors are returned to the caller; dispatched items settle on
    /// their own tasks.
    pub async fn tick(&self) -> QueueResult<usize> {
        let backend = self.engine.backend();
        if backend.is_paused().await? {
            debug!("queue paused, skipping poll");
            return Ok(0);
        }

        let available = self.permits.available_permits();
        if available == 0 {
            debug!("no free slots, skipping poll");
            return Ok(0);
        }

        let items = backend.dequeue(available).await?;
        let mut dispatched = 0;

        for item in items {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Another tick took the slot; hand the claim back
                    warn!(item_id = %item.id, "no free slot for dequeued item, returning it");
                    backend.update_status(&item.id, ItemStatus::Queued).await?;
                    continue;
                }
            };

            let engine = self.engine.clone();
            let processor = self.processor.clone();
            tokio::spawn(async move {
                engine.process_item(item, processor).await;
                drop(permit);
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!(dispatched, "dispatched items");
        }
        Ok(dispatched)
    }

    /// Poll until `shutdown` fires. Dispatched work is left to finish.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> QueueResult<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrent = self.engine.config().max_concurrent,
            "poller started"
        );

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "poll tick failed");
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("poller stopped");
        Ok(())
    }
}
