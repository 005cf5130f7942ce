use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{
    backend::QueueBackend,
    config::QueueConfig,
    engine::QueueEngine,
    execution::Processor,
    observability::{BoxStream, Monitor, QueueStats},
    poller::Poller,
    reaper::StuckReaper,
    EnqueueOptions, ItemId, ItemStatus, ProcessingCounts, QueueError, QueueEvent, QueueItem,
    QueueResult,
};

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    name: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

impl WorkerHandle {
    fn spawn<F, Fut>(name: &'static str, worker: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(worker(shutdown_rx));
        Self {
            name,
            shutdown_tx,
            join_handle,
        }
    }

    /// Gracefully shutdown the worker
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("{} join error: {}", self.name, e)))?
    }

    /// Signal shutdown without waiting for the loop to exit
    fn signal(self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

struct Workers {
    poller: WorkerHandle,
    reaper: WorkerHandle,
}

impl Workers {
    /// Stop both loops, then report the first failure
    async fn shutdown(self) -> QueueResult<()> {
        let poller = self.poller.shutdown().await;
        let reaper = self.reaper.shutdown().await;
        poller.and(reaper)
    }
}

/// Host-facing facade over one dispatcher instance.
///
/// Owns the engine, the poll loop and the stuck-item reaper. Nothing runs in
/// the background until [`start`](Self::start) is called.
pub struct QueueAdapter<B: QueueBackend> {
    backend: Arc<B>,
    engine: QueueEngine<B>,
    processor: Arc<dyn Processor>,
    poller: Poller<B>,
    workers: Mutex<Option<Workers>>,
}

impl<B: QueueBackend + 'static> QueueAdapter<B> {
    /// Create a new adapter with default configuration
    pub fn new(backend: B, processor: impl Processor) -> Self {
        Self::build(Arc::new(backend), Arc::new(processor), QueueConfig::default())
    }

    /// Create adapter with custom configuration
    pub fn with_config(
        backend: B,
        processor: impl Processor,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        Self::with_shared_backend(Arc::new(backend), Arc::new(processor), config)
    }

    /// Create adapter over a backend the host keeps a handle to
    pub fn with_shared_backend(
        backend: Arc<B>,
        processor: Arc<dyn Processor>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self::build(backend, processor, config))
    }

    fn build(backend: Arc<B>, processor: Arc<dyn Processor>, config: QueueConfig) -> Self {
        let engine = QueueEngine::new(backend.clone(), config);
        let poller = Poller::new(engine.clone(), processor.clone());
        Self {
            backend,
            engine,
            processor,
            poller,
            workers: Mutex::new(None),
        }
    }

    /// Replace the error-tracking collaborator
    pub fn with_monitor(mut self, monitor: impl Monitor) -> Self {
        self.engine = self.engine.clone().with_monitor(monitor);
        self.poller = Poller::new(self.engine.clone(), self.processor.clone());
        self
    }

    /// Persist a new queued item and return its id
    #[instrument(skip(self, payload, options), fields(priority = %options.priority))]
    pub async fn enqueue(&self, payload: Value, options: EnqueueOptions) -> QueueResult<ItemId> {
        let item = QueueItem::new(payload, options);
        let id = item.id.clone();
        self.backend.enqueue(item).await?;

        debug!(item_id = %id, "item enqueued");
        Ok(id)
    }

    /// Serialize `payload` and enqueue it
    pub async fn enqueue_json<T: Serialize>(
        &self,
        payload: &T,
        options: EnqueueOptions,
    ) -> QueueResult<ItemId> {
        let value = serde_json::to_value(payload)?;
        self.enqueue(value, options).await
    }

    /// Enqueue under `id` unless an item with that id already exists
    #[instrument(skip(self, payload, options), fields(item_id = %id))]
    pub async fn enqueue_once(
        &self,
        id: ItemId,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<bool> {
        let created = self.backend.enqueue_once(id, payload, options).await?;
        if !created {
            debug!("item already exists, not enqueued");
        }
        Ok(created)
    }

    /// Stop handing out new work. In-flight items continue.
    pub async fn pause(&self) -> QueueResult<()> {
        self.backend.pause().await?;
        info!("queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> QueueResult<()> {
        self.backend.resume().await?;
        info!("queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> QueueResult<bool> {
        self.backend.is_paused().await
    }

    /// Processing counters of this instance
    pub fn stats(&self) -> QueueStats {
        self.engine.stats()
    }

    /// Register an event subscriber
    pub fn subscribe(&self) -> QueueResult<broadcast::Receiver<QueueEvent>> {
        self.engine.subscribe()
    }

    /// Subscribe to events as a stream
    pub fn event_stream(&self) -> QueueResult<BoxStream<QueueEvent>> {
        self.engine.events().event_stream()
    }

    pub async fn get_item(&self, id: &ItemId) -> QueueResult<Option<QueueItem>> {
        self.backend.get_item(id).await
    }

    pub async fn dead_letter_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.backend.dead_letter_items(limit).await
    }

    pub async fn processing_counts(&self) -> QueueResult<ProcessingCounts> {
        self.backend.processing_counts().await
    }

    /// Withdraw a queued or failed item. Returns `false` for items that are
    /// processing or already settled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &ItemId) -> QueueResult<bool> {
        let item = self.require(id).await?;
        match item.status() {
            ItemStatus::Queued | ItemStatus::Failed => {
                self.backend.update_status(id, ItemStatus::Cancelled).await?;
                info!("item cancelled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Put a failed item back in the queue for immediate pickup.
    /// Attempts are kept.
    #[instrument(skip(self))]
    pub async fn requeue(&self, id: &ItemId) -> QueueResult<bool> {
        let mut item = self.require(id).await?;
        if item.status() != ItemStatus::Failed {
            return Ok(false);
        }

        item.metadata.status = ItemStatus::Queued;
        item.metadata.next_attempt_at = None;
        self.backend.enqueue(item).await?;
        info!("failed item requeued");
        Ok(true)
    }

    /// Route a queued or failed item to the dead letter by hand
    #[instrument(skip(self))]
    pub async fn dead_letter(&self, id: &ItemId, reason: &str) -> QueueResult<bool> {
        let item = self.require(id).await?;
        match item.status() {
            ItemStatus::Queued | ItemStatus::Failed => {
                self.backend.move_to_dead_letter(id, reason).await?;
                info!("item moved to dead letter");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Run one poll cycle now, sharing the running loop's concurrency bound
    pub async fn poll_once(&self) -> QueueResult<usize> {
        self.poller.tick().await
    }

    /// Run one stuck-item sweep now
    pub async fn sweep_stuck(&self) -> QueueResult<usize> {
        self.engine.sweep_stuck().await
    }

    /// Start the poll loop and the stuck-item reaper
    #[instrument(skip(self))]
    pub fn start(&self) -> QueueResult<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err(QueueError::AlreadyRunning);
        }

        let poller = self.poller.clone();
        let reaper = StuckReaper::new(self.engine.clone());
        *workers = Some(Workers {
            poller: WorkerHandle::spawn("poller", move |rx| poller.run(rx)),
            reaper: WorkerHandle::spawn("reaper", move |rx| reaper.run(rx)),
        });

        info!("dispatcher started");
        Ok(())
    }

    /// Stop both loops. Items already dispatched run to completion.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> QueueResult<()> {
        let workers = self.workers.lock().take().ok_or(QueueError::NotRunning)?;

        let result = workers.shutdown().await;
        if let Err(e) = &result {
            error!(error = %e, "worker shutdown failed");
        }

        info!(in_flight = self.engine.in_flight_count(), "dispatcher stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Get the processing engine
    pub fn engine(&self) -> &QueueEngine<B> {
        &self.engine
    }

    /// Get backend reference
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get configuration
    pub fn config(&self) -> &QueueConfig {
        self.engine.config()
    }

    async fn require(&self, id: &ItemId) -> QueueResult<QueueItem> {
        self.backend
            .get_item(id)
            .await?
            .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))
    }
}

impl<B: QueueBackend> Drop for QueueAdapter<B> {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.poller.signal();
            workers.reaper.signal();
        }
    }
}
