pub mod breaker;
pub mod processor;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use processor::{ProcessOutcome, Processor};
