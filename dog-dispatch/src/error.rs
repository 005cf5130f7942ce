use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Listener limit reached ({0} subscribers)")]
    ListenerLimit(usize),

    #[error("Dispatcher is already running")]
    AlreadyRunning,

    #[error("Dispatcher is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised by a processor while handling an item.
///
/// Returned errors are funneled into the retry state machine, recorded on the
/// item and reported to the [`Monitor`](crate::observability::Monitor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),
}

impl ProcessError {
    /// Create a processing failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(msg) => msg,
        }
    }
}

impl From<String> for ProcessError {
    fn from(msg: String) -> Self {
        Self::Failed(msg)
    }
}

impl From<&str> for ProcessError {
    fn from(msg: &str) -> Self {
        Self::Failed(msg.to_string())
    }
}

/// Outcome of a call gated by the circuit breaker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// Breaker rejected the call without invoking it
    #[error("Circuit breaker is open")]
    Open,

    /// The wrapped call failed
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Check if the call was rejected by an open breaker
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}
