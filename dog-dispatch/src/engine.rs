use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::QueueBackend,
    config::QueueConfig,
    execution::{CircuitBreaker, ProcessOutcome, Processor},
    observability::{ErrorContext, EventHub, LiveMetrics, Monitor, QueueStats, TracingMonitor},
    CircuitError, ItemId, ItemStatus, ProcessContext, ProcessError, QueueError, QueueEvent,
    QueueItem, QueueResult, RetryCause,
};

/// Dead-letter reason for items that ran out of attempts
pub const REASON_MAX_RETRIES: &str = "max_retries";

/// Retry delay after `attempts` funneled failures:
/// `min(base * 2^(attempts - 1), max)`.
pub fn backoff_delay(base: Duration, attempts: u32, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Bookkeeping for one dispatch of one item
struct InFlight {
    ticket: u64,
    started_at: Instant,
    /// Set by whichever of completion or deadline gets there first
    settled: Arc<AtomicBool>,
    cancellation: CancellationToken,
}

/// Per-item processing orchestration: in-flight dedup, deadline supervision,
/// circuit breaking and the retry / dead-letter state machine.
pub struct QueueEngine<B: QueueBackend> {
    backend: Arc<B>,
    config: Arc<QueueConfig>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<dyn Monitor>,
    events: EventHub,
    metrics: Arc<LiveMetrics>,
    in_flight: Arc<DashMap<ItemId, InFlight>>,
    tickets: Arc<AtomicU64>,
}

impl<B: QueueBackend> Clone for QueueEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            breaker: self.breaker.clone(),
            monitor: self.monitor.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            tickets: self.tickets.clone(),
        }
    }
}

impl<B: QueueBackend + 'static> QueueEngine<B> {
    /// Create an engine over a shared backend
    pub fn new(backend: Arc<B>, config: QueueConfig) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(&config.breaker)),
            events: EventHub::new(config.event_capacity, config.max_listeners),
            backend,
            config: Arc::new(config),
            monitor: Arc::new(TracingMonitor),
            metrics: Arc::new(LiveMetrics::new()),
            in_flight: Arc::new(DashMap::new()),
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the error-tracking collaborator
    pub fn with_monitor(mut self, monitor: impl Monitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    /// Process one item to a settled state.
    ///
    /// Returns immediately if the same id is already in flight. Failures are
    /// handled here and never returned to the caller. If the deadline passes
    /// first, the processor future is dropped and this returns once the item
    /// has been marked failed.
    #[instrument(skip_all, fields(item_id = %item.id, priority = %item.priority))]
    pub async fn process_item(&self, mut item: QueueItem, processor: Arc<dyn Processor>) {
        let id = item.id.clone();
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let settled = Arc::new(AtomicBool::new(false));
        let cancellation = CancellationToken::new();

        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!("item already in flight, skipping");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    ticket,
                    started_at: Instant::now(),
                    settled: settled.clone(),
                    cancellation: cancellation.clone(),
                });
            }
        }

        let deadline = CancellationToken::new();
        let watchdog = self.spawn_deadline(
            id.clone(),
            ticket,
            settled.clone(),
            cancellation.clone(),
            deadline.clone(),
        );
        let started = Instant::now();

        item.metadata.status = ItemStatus::Processing;
        item.metadata.last_attempt_at = Some(Utc::now());
        if let Err(e) = self.backend.enqueue(item.clone()).await {
            error!(error = %e, "failed to mark item processing");
        }

        let ctx = ProcessContext::new(id.clone(), item.metadata.attempts + 1, self.config.timeout)
            .with_cancellation(cancellation);
        let result = tokio::select! {
            // Processor first so a cooperative one can observe cancellation
            biased;
            result = self.breaker.call(|| processor.process(item.clone(), ctx)) => result,
            _ = deadline.cancelled() => {
                debug!("deadline passed, abandoning processor");
                return;
            }
        };

        if !matches!(result, Err(CircuitError::Open)) {
            self.metrics.record_duration(started.elapsed());
            self.metrics.record_processed(&id);
        }

        if settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("processor returned after its deadline, outcome discarded");
            return;
        }
        watchdog.abort();
        // Storage still says processing, so the id cannot be re-dispatched
        // before the outcome below is persisted
        self.in_flight.remove_if(&id, |_, entry| entry.ticket == ticket);

        let handled = match result {
            Ok(ProcessOutcome::Delivered) => self.on_delivered(&item).await,
            Ok(ProcessOutcome::Failed) => self.on_failure(item, None).await,
            Err(CircuitError::Inner(err)) => self.on_failure(item, Some(err)).await,
            Err(CircuitError::Open) => self.on_circuit_open(item).await,
        };
        if let Err(e) = handled {
            error!(error = %e, "failed to persist processing outcome");
        }
    }

    async fn on_delivered(&self, item: &QueueItem) -> QueueResult<()> {
        self.backend.complete(&item.id, true).await?;

        info!(attempts = item.metadata.attempts, "item delivered");
        self.events.emit(QueueEvent::ItemDelivered {
            item_id: item.id.clone(),
            attempts: item.metadata.attempts,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Retry / dead-letter state machine for funneled failures
    async fn on_failure(&self, mut item: QueueItem, error: Option<ProcessError>) -> QueueResult<()> {
        self.metrics.increment_errors();
        item.metadata.attempts += 1;

        if let Some(err) = &error {
            item.metadata.error = Some(err.to_string());
            self.monitor.track_error(
                err,
                &ErrorContext {
                    item_id: item.id.clone(),
                    priority: item.priority,
                    attempts: item.metadata.attempts,
                },
            );
        }

        if item.metadata.attempts >= self.config.max_retries {
            self.backend.enqueue(item.clone()).await?;
            self.backend
                .move_to_dead_letter(&item.id, REASON_MAX_RETRIES)
                .await?;

            error!(attempts = item.metadata.attempts, "item moved to dead letter");
            self.events.emit(QueueEvent::ItemUndeliverable {
                item_id: item.id.clone(),
                attempts: item.metadata.attempts,
                reason: REASON_MAX_RETRIES.to_string(),
                error: item.metadata.error.clone(),
                at: Utc::now(),
            });
            return Ok(());
        }

        let delay = backoff_delay(
            self.config.backoff_base,
            item.metadata.attempts,
            self.config.max_backoff,
        );
        self.requeue_after(item, delay, RetryCause::Failure).await
    }

    /// The breaker refused the call: put the item back without consuming an attempt
    async fn on_circuit_open(&self, item: QueueItem) -> QueueResult<()> {
        let remaining = self.breaker.remaining_cooldown();
        let delay = if remaining.is_zero() {
            self.config.backoff_base
        } else {
            remaining
        };
        self.requeue_after(item, delay, RetryCause::CircuitOpen).await
    }

    async fn requeue_after(
        &self,
        mut item: QueueItem,
        delay: Duration,
        cause: RetryCause,
    ) -> QueueResult<()> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| QueueError::Internal(format!("retry delay out of range: {}", e)))?;
        let next_attempt_at = Utc::now() + delay;

        item.metadata.status = ItemStatus::Queued;
        item.metadata.next_attempt_at = Some(next_attempt_at);
        self.backend.enqueue(item.clone()).await?;

        warn!(
            attempts = item.metadata.attempts,
            delay_ms = delay.num_milliseconds(),
            ?cause,
            "retry scheduled"
        );
        self.events.emit(QueueEvent::ItemRetryScheduled {
            item_id: item.id,
            attempts: item.metadata.attempts,
            next_attempt_at,
            cause,
            at: Utc::now(),
        });
        Ok(())
    }

    fn spawn_deadline(
        &self,
        id: ItemId,
        ticket: u64,
        settled: Arc<AtomicBool>,
        cancellation: CancellationToken,
        deadline: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if settled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            cancellation.cancel();
            engine.on_timeout(&id, ticket).await;
            // Releases the dispatching task even if the processor never returns
            deadline.cancel();
        })
    }

    async fn on_timeout(&self, id: &ItemId, ticket: u64) {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        warn!(item_id = %id, timeout_ms, "item processing timed out");

        if let Err(e) = self.backend.update_status(id, ItemStatus::Failed).await {
            error!(item_id = %id, error = %e, "failed to mark timed-out item");
        }
        self.events.emit(QueueEvent::ItemTimeout {
            item_id: id.clone(),
            timeout_ms,
            at: Utc::now(),
        });
        self.in_flight.remove_if(id, |_, entry| entry.ticket == ticket);
    }

    /// Mark items stuck in `processing` for more than twice the timeout as failed.
    /// Returns how many were found.
    #[instrument(skip(self))]
    pub async fn sweep_stuck(&self) -> QueueResult<usize> {
        let window = chrono::Duration::from_std(self.config.timeout * 2)
            .map_err(|e| QueueError::Internal(format!("stuck window out of range: {}", e)))?;
        let since = Utc::now() - window;

        let stuck = self.backend.find_stuck_processing(since).await?;
        for item in &stuck {
            warn!(
                item_id = %item.id,
                last_attempt_at = ?item.metadata.last_attempt_at,
                "stuck item marked failed"
            );
            self.backend.update_status(&item.id, ItemStatus::Failed).await?;
            self.events.emit(QueueEvent::ItemStuck {
                item_id: item.id.clone(),
                last_attempt_at: item.metadata.last_attempt_at,
                at: Utc::now(),
            });
        }

        Ok(stuck.len())
    }

    /// Cooperatively cancel a dispatch in flight. Returns false if none.
    pub fn cancel_in_flight(&self, id: &ItemId) -> bool {
        match self.in_flight.get(id) {
            Some(entry) => {
                entry.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// How long the current dispatch of `id` has been running
    pub fn in_flight_for(&self, id: &ItemId) -> Option<Duration> {
        self.in_flight.get(id).map(|entry| entry.started_at.elapsed())
    }

    pub fn is_in_flight(&self, id: &ItemId) -> bool {
        self.in_flight.contains_key(id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Processing counters
    pub fn stats(&self) -> QueueStats {
        self.metrics.snapshot(self.in_flight.len())
    }

    /// Register an event subscriber
    pub fn subscribe(&self) -> QueueResult<broadcast::Receiver<QueueEvent>> {
        self.events.subscribe()
    }

    /// Get event hub
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Get circuit breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Get backend reference
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::{config::BreakerConfig, EnqueueOptions, Priority};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct CountingMonitor(Arc<AtomicU32>);

    impl Monitor for CountingMonitor {
        fn track_error(&self, _error: &ProcessError, _ctx: &ErrorContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> QueueConfig {
        QueueConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(3)
            .with_backoff(Duration::from_millis(1000), Duration::from_secs(30))
    }

    async fn setup(config: QueueConfig) -> (QueueEngine<MemoryBackend>, Arc<MemoryBackend>, QueueItem) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = QueueEngine::new(backend.clone(), config);
        let item = QueueItem::new(
            json!({"order": 7}),
            EnqueueOptions::new().with_id("order-7").with_priority(Priority::High),
        );
        backend.enqueue(item.clone()).await.unwrap();
        (engine, backend, item)
    }

    fn always(outcome: ProcessOutcome) -> Arc<dyn Processor> {
        Arc::new(move |_item: QueueItem, _ctx: ProcessContext| async move {
            Ok::<_, ProcessError>(outcome)
        })
    }

    fn throwing(msg: &'static str) -> Arc<dyn Processor> {
        Arc::new(move |_item: QueueItem, _ctx: ProcessContext| async move {
            Err::<ProcessOutcome, _>(ProcessError::failed(msg))
        })
    }

    fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn stored(backend: &MemoryBackend, id: &ItemId) -> QueueItem {
        backend.get_item(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_backoff_table() {
        let base = Duration::from_millis(1000);
        let cap = Duration::from_secs(30);
        let delays: Vec<u128> = (1..=7)
            .map(|attempt| backoff_delay(base, attempt, cap).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    proptest! {
        #[test]
        fn backoff_is_capped_and_monotonic(attempts in 1u32..10_000, base_ms in 1u64..10_000) {
            let base = Duration::from_millis(base_ms);
            let cap = Duration::from_secs(30);
            let delay = backoff_delay(base, attempts, cap);
            prop_assert!(delay <= cap);
            prop_assert!(delay >= base.min(cap));
            prop_assert!(backoff_delay(base, attempts + 1, cap) >= delay);
        }
    }

    #[tokio::test]
    async fn test_success_marks_delivered() {
        let (engine, backend, item) = setup(config()).await;
        let mut rx = engine.subscribe().unwrap();

        engine.process_item(item.clone(), always(ProcessOutcome::Delivered)).await;

        assert_eq!(stored(&backend, &item.id).await.status(), ItemStatus::Delivered);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "itemDelivered");

        let stats = engine.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.currently_processing, 0);
    }

    #[tokio::test]
    async fn test_explicit_failure_schedules_retry() {
        let monitor = CountingMonitor::default();
        let (engine, backend, item) = setup(config()).await;
        let engine = engine.with_monitor(monitor.clone());
        let mut rx = engine.subscribe().unwrap();

        let before = Utc::now();
        engine.process_item(item.clone(), always(ProcessOutcome::Failed)).await;

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Queued);
        assert_eq!(after.metadata.attempts, 1);
        assert!(after.metadata.error.is_none());
        let next = after.metadata.next_attempt_at.unwrap();
        assert!(next >= before + chrono::Duration::milliseconds(1000));
        assert_eq!(monitor.0.load(Ordering::SeqCst), 0);

        match drain(&mut rx).as_slice() {
            [QueueEvent::ItemRetryScheduled { attempts, cause, .. }] => {
                assert_eq!(*attempts, 1);
                assert_eq!(*cause, RetryCause::Failure);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_thrown_error_is_recorded_and_tracked() {
        let monitor = CountingMonitor::default();
        let (engine, backend, item) = setup(config()).await;
        let engine = engine.with_monitor(monitor.clone());

        engine.process_item(item.clone(), throwing("smtp down")).await;

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.metadata.attempts, 1);
        assert_eq!(after.metadata.error.as_deref(), Some("smtp down"));
        assert_eq!(monitor.0.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().total_errors, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_retries() {
        let (engine, backend, item) = setup(config()).await;
        let mut rx = engine.subscribe().unwrap();
        let processor = throwing("nope");

        for expected in 1..=3u32 {
            let current = stored(&backend, &item.id).await;
            engine.process_item(current, processor.clone()).await;
            assert_eq!(stored(&backend, &item.id).await.metadata.attempts, expected);
        }

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Undeliverable);
        assert_eq!(after.metadata.reason.as_deref(), Some(REASON_MAX_RETRIES));

        let dead = backend.dead_letter_items(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, item.id);
        assert_eq!(dead[0].metadata.error.as_deref(), Some("nope"));

        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec!["itemRetryScheduled", "itemRetryScheduled", "itemUndeliverable"]
        );

        let stats = engine.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_errors, 3);
    }

    #[tokio::test]
    async fn test_same_id_is_processed_once_at_a_time() {
        let (engine, backend, item) = setup(config()).await;
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU32::new(0));

        let processor: Arc<dyn Processor> = {
            let gate = gate.clone();
            let calls = calls.clone();
            Arc::new(move |_item: QueueItem, _ctx: ProcessContext| {
                let gate = gate.clone();
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok::<_, ProcessError>(ProcessOutcome::Delivered)
                }
            })
        };

        let first = {
            let engine = engine.clone();
            let item = item.clone();
            let processor = processor.clone();
            tokio::spawn(async move { engine.process_item(item, processor).await })
        };
        while !engine.is_in_flight(&item.id) {
            tokio::task::yield_now().await;
        }

        engine.process_item(item.clone(), processor.clone()).await;
        assert_eq!(engine.in_flight_count(), 1);

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.in_flight_count(), 0);
        assert_eq!(stored(&backend, &item.id).await.status(), ItemStatus::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_failed_and_discards_late_outcome() {
        let (engine, backend, item) =
            setup(config().with_timeout(Duration::from_secs(1))).await;
        let mut rx = engine.subscribe().unwrap();

        let stubborn: Arc<dyn Processor> =
            Arc::new(|_item: QueueItem, _ctx: ProcessContext| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ProcessError>(ProcessOutcome::Delivered)
            });
        engine.process_item(item.clone(), stubborn).await;

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Failed);
        assert_eq!(after.metadata.attempts, 0);

        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_name()).collect();
        assert_eq!(names, vec!["itemTimeout"]);

        let stats = engine.stats();
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.currently_processing, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_cooperative_processor() {
        let (engine, backend, item) =
            setup(config().with_timeout(Duration::from_secs(1))).await;
        let observed = Arc::new(AtomicBool::new(false));

        let cooperative: Arc<dyn Processor> = {
            let observed = observed.clone();
            Arc::new(move |_item: QueueItem, ctx: ProcessContext| {
                let observed = observed.clone();
                async move {
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            observed.store(true, Ordering::SeqCst);
                            Ok::<_, ProcessError>(ProcessOutcome::Failed)
                        }
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {
                            Ok(ProcessOutcome::Delivered)
                        }
                    }
                }
            })
        };
        engine.process_item(item.clone(), cooperative).await;

        assert!(observed.load(Ordering::SeqCst));
        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Failed);
        assert_eq!(after.metadata.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_requeues_without_consuming_attempt() {
        let cfg = config().with_breaker(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(10),
        });
        let (engine, backend, first) = setup(cfg).await;
        let second = QueueItem::new(json!(2), EnqueueOptions::new().with_id("second"));
        backend.enqueue(second.clone()).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let processor: Arc<dyn Processor> = {
            let calls = calls.clone();
            Arc::new(move |_item: QueueItem, _ctx: ProcessContext| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<ProcessOutcome, _>(ProcessError::failed("upstream 503"))
                }
            })
        };

        engine.process_item(first.clone(), processor.clone()).await;
        assert!(engine.breaker().is_open());

        let mut rx = engine.subscribe().unwrap();
        engine.process_item(second.clone(), processor).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let after = stored(&backend, &second.id).await;
        assert_eq!(after.status(), ItemStatus::Queued);
        assert_eq!(after.metadata.attempts, 0);
        assert!(after.metadata.next_attempt_at.unwrap() > Utc::now());

        match drain(&mut rx).as_slice() {
            [QueueEvent::ItemRetryScheduled { cause, attempts, .. }] => {
                assert_eq!(*cause, RetryCause::CircuitOpen);
                assert_eq!(*attempts, 0);
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(engine.stats().total_errors, 1);
        assert_eq!(engine.stats().total_processed, 1);
    }

    #[tokio::test]
    async fn test_sweep_marks_stuck_items_failed() {
        let (engine, backend, item) = setup(config()).await;
        let fresh = QueueItem::new(json!(0), EnqueueOptions::new().with_id("fresh"));
        backend.enqueue(fresh.clone()).await.unwrap();
        backend.dequeue(10).await.unwrap();

        backend.backdate_last_attempt(&item.id, Utc::now() - chrono::Duration::seconds(30));
        let mut rx = engine.subscribe().unwrap();

        assert_eq!(engine.sweep_stuck().await.unwrap(), 1);

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Failed);
        assert_eq!(after.metadata.attempts, 0);
        assert_eq!(stored(&backend, &fresh.id).await.status(), ItemStatus::Processing);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "itemStuck");
        assert_eq!(events[0].item_id(), &item.id);
        assert_eq!(engine.stats().total_errors, 0);
    }

    #[tokio::test]
    async fn test_direct_dispatch_stamps_last_attempt() {
        let (engine, backend, item) = setup(config()).await;
        backend.set_queued_at(&item.id, Utc::now() - chrono::Duration::minutes(10));
        let gate = Arc::new(Notify::new());

        let processor: Arc<dyn Processor> = {
            let gate = gate.clone();
            Arc::new(move |_item: QueueItem, _ctx: ProcessContext| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, ProcessError>(ProcessOutcome::Delivered)
                }
            })
        };

        let current = stored(&backend, &item.id).await;
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_item(current, processor).await })
        };
        while stored(&backend, &item.id).await.status() != ItemStatus::Processing {
            tokio::task::yield_now().await;
        }

        let during = stored(&backend, &item.id).await;
        let stamped = during.metadata.last_attempt_at.unwrap();
        assert!(stamped > Utc::now() - chrono::Duration::seconds(5));
        // Old queued_at must not make a fresh dispatch look stuck
        assert_eq!(engine.sweep_stuck().await.unwrap(), 0);

        gate.notify_one();
        task.await.unwrap();
        assert_eq!(stored(&backend, &item.id).await.status(), ItemStatus::Delivered);
    }

    #[tokio::test]
    async fn test_redispatch_refreshes_stale_attempt_stamp() {
        let (engine, backend, item) = setup(config()).await;
        let stale = Utc::now() - chrono::Duration::minutes(10);
        backend.backdate_last_attempt(&item.id, stale);

        let current = stored(&backend, &item.id).await;
        engine.process_item(current, always(ProcessOutcome::Failed)).await;

        let after = stored(&backend, &item.id).await;
        assert_eq!(after.status(), ItemStatus::Queued);
        assert!(after.metadata.last_attempt_at.unwrap() > stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_processor_that_ignores_cancellation() {
        let (engine, backend, item) =
            setup(config().with_timeout(Duration::from_millis(50))).await;

        let hung: Arc<dyn Processor> =
            Arc::new(|_item: QueueItem, _ctx: ProcessContext| async move {
                std::future::pending::<()>().await;
                Ok::<_, ProcessError>(ProcessOutcome::Delivered)
            });

        // Returns once the deadline has settled the item
        engine.process_item(item.clone(), hung).await;

        assert_eq!(stored(&backend, &item.id).await.status(), ItemStatus::Failed);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_reaches_processor() {
        let (engine, _backend, item) = setup(config()).await;
        assert!(!engine.cancel_in_flight(&item.id));

        let processor: Arc<dyn Processor> =
            Arc::new(|_item: QueueItem, ctx: ProcessContext| async move {
                ctx.cancelled().await;
                Ok::<_, ProcessError>(ProcessOutcome::Failed)
            });
        let task = {
            let engine = engine.clone();
            let item = item.clone();
            tokio::spawn(async move { engine.process_item(item, processor).await })
        };
        while !engine.is_in_flight(&item.id) {
            tokio::task::yield_now().await;
        }
        assert!(engine.in_flight_for(&item.id).is_some());
        assert!(engine.cancel_in_flight(&item.id));
        task.await.unwrap();
        assert_eq!(engine.stats().total_errors, 1);
    }
}
