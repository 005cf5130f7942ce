//! Dispatcher configuration.
//!
//! [`QueueConfig`] is a plain struct with sensible defaults and `with_*`
//! builders. Applications that configure through the environment can use
//! [`QueueConfig::from_env`], which follows the DogRS `PREFIX__KEY`
//! convention:
//!
//! ```bash
//! export DISPATCH__MAX_CONCURRENT=32
//! export DISPATCH__TIMEOUT_MS=15000
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open after the last failure
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Delay between poll ticks
    pub poll_interval: Duration,
    /// Maximum number of items processed at once
    pub max_concurrent: usize,
    /// Processing budget per item before it is marked failed
    pub timeout: Duration,
    /// Funneled failures before an item is dead-lettered
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub max_backoff: Duration,
    /// Interval of the stuck-item sweep
    pub stuck_check_interval: Duration,
    /// Circuit breaker around the processor
    pub breaker: BreakerConfig,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
    /// Maximum concurrent event subscribers
    pub max_listeners: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_concurrent: 10,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            stuck_check_interval: Duration::from_secs(60),
            breaker: BreakerConfig::default(),
            event_capacity: 1024,
            max_listeners: 16,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    pub fn with_stuck_check_interval(mut self, interval: Duration) -> Self {
        self.stuck_check_interval = interval;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }

    /// Load defaults overridden by `PREFIX__KEY` environment variables
    pub fn from_env(prefix: &str) -> QueueResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list
    pub fn from_vars<I>(prefix: &str, vars: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        let prefix = format!("{}__", prefix.trim_end_matches('_'));

        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(&prefix) else {
                continue;
            };
            let name = stripped.to_lowercase();
            match name.as_str() {
                "poll_interval_ms" => config.poll_interval = millis(&name, &value)?,
                "max_concurrent" => config.max_concurrent = parse(&name, &value)?,
                "timeout_ms" => config.timeout = millis(&name, &value)?,
                "max_retries" => config.max_retries = parse(&name, &value)?,
                "backoff_base_ms" => config.backoff_base = millis(&name, &value)?,
                "max_backoff_ms" => config.max_backoff = millis(&name, &value)?,
                "stuck_check_interval_ms" => config.stuck_check_interval = millis(&name, &value)?,
                "breaker_threshold" => config.breaker.failure_threshold = parse(&name, &value)?,
                "breaker_cooldown_ms" => config.breaker.cooldown = millis(&name, &value)?,
                "event_capacity" => config.event_capacity = parse(&name, &value)?,
                "max_listeners" => config.max_listeners = parse(&name, &value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.max_concurrent == 0 {
            return Err(QueueError::Config("max_concurrent must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(QueueError::Config("max_retries must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.stuck_check_interval.is_zero() {
            return Err(QueueError::Config("intervals must be non-zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(QueueError::Config("timeout must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::Config("event_capacity must be at least 1".into()));
        }
        if self.max_listeners == 0 {
            return Err(QueueError::Config("max_listeners must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(QueueError::Config(
                "breaker failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> QueueResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| QueueError::Config(format!("invalid value for {}: {:?}", key, value)))
}

fn millis(key: &str, value: &str) -> QueueResult<Duration> {
    parse::<u64>(key, value).map(Duration::from_millis)
}
