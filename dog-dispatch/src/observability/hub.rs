use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, trace};

use crate::{QueueError, QueueEvent, QueueResult};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Instance-scoped event fan-out.
///
/// Backed by a bounded broadcast channel: slow subscribers lag and lose the
/// oldest events instead of growing a buffer, and the number of live
/// subscribers is capped.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<QueueEvent>,
    max_listeners: usize,
    // Serializes the count check with the subscribe
    subscribe_lock: Arc<Mutex<()>>,
}

impl EventHub {
    pub fn new(capacity: usize, max_listeners: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            max_listeners,
            subscribe_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Publish an event to current subscribers
    pub fn emit(&self, event: QueueEvent) {
        trace!(event = event.event_name(), item_id = %event.item_id(), "emitting event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> QueueResult<broadcast::Receiver<QueueEvent>> {
        let _guard = self.subscribe_lock.lock();
        let current = self.sender.receiver_count();
        if current >= self.max_listeners {
            return Err(QueueError::ListenerLimit(self.max_listeners));
        }
        debug!(listeners = current + 1, "event subscriber registered");
        Ok(self.sender.subscribe())
    }

    /// Subscribe as a stream; lagged gaps are skipped
    pub fn event_stream(&self) -> QueueResult<BoxStream<QueueEvent>> {
        let receiver = self.subscribe()?;
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Ok(Box::pin(stream))
    }

    /// Number of live subscribers
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
