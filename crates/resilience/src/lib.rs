//! `manifold-resilience` — retry and circuit-breaker primitives.
//!
//! Pure, per-call utilities with no dependency on the rest of the system.
//! The orchestrator composes them as
//! `breaker.execute(|| policy.run(pred, || provider_call()))`, so a burst of
//! retried transient failures counts toward tripping the breaker exactly once
//! per orchestrated call.

pub mod breaker;
pub mod retry;

pub use breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use retry::RetryPolicy;
