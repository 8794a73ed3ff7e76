//! `manifold-inference` — provider boundary and extraction orchestration.
//!
//! **Responsibility:** everything between "a leased job" and "a manifest or
//! a specific failure". The inference provider is a black box capability
//! (`infer(image, instructions, format, schema) -> document`); its failures
//! are classified by status code and network error class only. This crate
//! must not mutate job or queue state — it produces outcomes, the worker
//! persists them.

pub mod error;
pub mod openai;
pub mod orchestrator;
pub mod provider;

pub use error::ProviderError;
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use orchestrator::{ExtractionOutcome, InferenceOrchestrator, OrchestratorError};
pub use provider::{GenerationMode, InferenceProvider, InferenceRequest};
