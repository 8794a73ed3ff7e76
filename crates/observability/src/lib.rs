//! `manifold-observability` — process-wide tracing/logging setup.

mod tracing;

pub use tracing::init;
