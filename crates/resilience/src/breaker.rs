//! Three-state circuit breaker.
//!
//! One breaker instance guards one named external dependency. State is
//! process-local: separate workers detect and recover from outages
//! independently, which trades a little redundant half-open probing for
//! zero cross-process coordination.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Breaker state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; failures are counted within the monitoring period.
    Closed,
    /// Calls are rejected until the probe timeout elapses.
    Open,
    /// A limited trial: successes close the breaker, any failure reopens it.
    HalfOpen,
}

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `monitoring_period` required to trip Closed -> Open.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe.
    pub timeout: Duration,
    /// Sliding window over which closed-state failures are counted.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// The breaker never swallows an operation error; it only gates whether the
/// operation is attempted at all.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the operation was not invoked.
    #[error("circuit breaker '{name}' is open; next attempt in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },

    /// The operation ran and failed; the original error is preserved.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Timestamps of closed-state failures within the monitoring period.
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    next_attempt_at: Option<Instant>,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                half_open_successes: 0,
                next_attempt_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Force Closed with all counters cleared (operational intervention).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.half_open_successes = 0;
        inner.next_attempt_at = None;
        warn!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Run `op` if the breaker admits it.
    ///
    /// The lock is held only around state bookkeeping, never across the
    /// operation itself.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            let now = Instant::now();
            match inner.next_attempt_at {
                Some(at) if now < at => {
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_in_ms: at.duration_since(now).as_millis() as u64,
                    });
                }
                _ => {
                    debug!(breaker = %self.name, "probe timeout elapsed, entering half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                }
            }
        }
        Ok(())
    }

    fn prune_failures(failures: &mut VecDeque<Instant>, window: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(window) else {
            return;
        };
        while failures.front().is_some_and(|t| *t < cutoff) {
            failures.pop_front();
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    debug!(breaker = %self.name, "half-open trial passed, closing");
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.half_open_successes = 0;
                    inner.next_attempt_at = None;
                }
            }
            CircuitState::Closed => {
                Self::prune_failures(&mut inner.failures, self.config.monitoring_period);
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                // Any failure during the trial reopens immediately.
                warn!(breaker = %self.name, "half-open probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.config.timeout);
                inner.half_open_successes = 0;
            }
            CircuitState::Closed => {
                Self::prune_failures(&mut inner.failures, self.config.monitoring_period);
                inner.failures.push_back(now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures.len(),
                        "failure threshold reached, opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at = Some(now + self.config.timeout);
                    inner.failures.clear();
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Process-owned collection of breakers, one per dependency name.
///
/// Constructed explicitly at the dependency-injection root and passed by
/// reference; deliberately not a module-level singleton so components stay
/// testable in isolation.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `name`, creating it lazily on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(name) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().unwrap();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone()))),
        )
    }

    /// Reset every registered breaker to Closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().unwrap().values() {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
