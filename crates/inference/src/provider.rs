//! The inference provider boundary.

use async_trait::async_trait;

use manifold_core::OutputFormat;

use crate::error::ProviderError;

/// How the provider should generate the document.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GenerationMode {
    /// Response constrained to an exact schema (guaranteed-shape contract).
    /// Used for JSON and CSV patterns.
    Structured,
    /// Free-form output guided by the schema-as-example. The result must be
    /// structurally validated afterwards.
    Freeform,
}

/// One inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub image_url: String,
    pub instructions: String,
    pub format: OutputFormat,
    /// JSON schema text (structured) or approved example document (freeform).
    pub schema: String,
    pub mode: GenerationMode,
}

impl InferenceRequest {
    pub fn new(
        image_url: impl Into<String>,
        instructions: impl Into<String>,
        format: OutputFormat,
        schema: impl Into<String>,
    ) -> Self {
        let mode = if format.is_structured() {
            GenerationMode::Structured
        } else {
            GenerationMode::Freeform
        };
        Self {
            image_url: image_url.into(),
            instructions: instructions.into(),
            format,
            schema: schema.into(),
            mode,
        }
    }
}

/// An external inference capability.
///
/// Implementations must not retry internally; the orchestrator owns the
/// retry and circuit-breaker policy around each call.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Dependency name used for circuit-breaker registration.
    fn name(&self) -> &str;

    /// Produce a document for the request, or fail with a classified error.
    async fn infer(&self, request: &InferenceRequest) -> Result<String, ProviderError>;
}
