use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{config::BreakerConfig, CircuitError};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Point-in-time breaker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    total_failures: u64,
    last_failure_at: Option<Instant>,
}

/// Failure-rate gate around processor calls.
///
/// The breaker is open while `consecutive_failures >= threshold` and the last
/// failure happened less than `cooldown` ago. There is no single-trial
/// half-open phase: once the cooldown elapses every call goes through, and
/// the first failure re-opens the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold,
            cooldown: config.cooldown,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Run `f` unless the breaker is open.
    ///
    /// `Ok` resets the failure count; `Err` bumps it and is handed back as
    /// [`CircuitError::Inner`].
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.is_open() {
            debug!("circuit open, rejecting call");
            return Err(CircuitError::Open);
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Check whether calls are currently rejected
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        self.open_locked(&inner)
    }

    pub fn state(&self) -> CircuitState {
        if self.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Time left until the breaker lets calls through again
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.inner.lock();
        if !self.open_locked(&inner) {
            return Duration::ZERO;
        }
        inner
            .last_failure_at
            .map(|at| self.cooldown.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: if self.open_locked(&inner) {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
        }
    }

    /// Forget recent failures and close the breaker
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
    }

    fn open_locked(&self, inner: &BreakerInner) -> bool {
        inner.consecutive_failures >= self.threshold
            && inner
                .last_failure_at
                .map_or(false, |at| at.elapsed() < self.cooldown)
    }

    fn record_success(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.total_failures += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.consecutive_failures == self.threshold {
            warn!(
                failures = inner.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_skips_calls() {
        let b = breaker(2, 1_000);
        assert!(matches!(fail(&b).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(matches!(fail(&b).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let b = breaker(2, 1_000);
        let _ = fail(&b).await;
        assert!(b.call(|| async { Ok::<_, &str>(7) }).await.is_ok());
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().consecutive_failures, 1);
        assert_eq!(b.stats().total_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_after_cooldown_reopens() {
        let b = breaker(1, 500);
        let _ = fail(&b).await;
        assert!(b.is_open());
        assert!(b.remaining_cooldown() > Duration::ZERO);

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!b.is_open());
        assert_eq!(b.remaining_cooldown(), Duration::ZERO);

        // No half-open trial budget: a single failure re-opens immediately
        assert!(matches!(fail(&b).await, Err(CircuitError::Inner(_))));
        assert!(b.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes() {
        let b = breaker(1, 60_000);
        let _ = fail(&b).await;
        assert!(b.is_open());
        b.reset();
        assert!(!b.is_open());
    }
}
