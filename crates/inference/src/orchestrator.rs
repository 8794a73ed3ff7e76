//! Extraction orchestration: strategy selection, resilience, validation.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{instrument, warn};

use manifold_core::{OutputFormat, Pattern};
use manifold_resilience::{BreakerError, CircuitBreakerRegistry, RetryPolicy};
use manifold_validation::{DocumentFormat, validate};

use crate::error::ProviderError;
use crate::provider::{InferenceProvider, InferenceRequest};

/// Terminal outcome of one orchestrated extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    /// The manifest to persist: the parsed JSON tree for structured formats,
    /// `{"format": ..., "content": ...}` for validated freeform documents.
    pub manifest: JsonValue,
    /// The raw document as the provider produced it.
    pub raw_document: String,
    /// Provider round-trip latency, resilience layers included.
    pub latency_ms: u64,
}

/// Failure of one orchestrated extraction.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The circuit breaker rejected the call before it reached the provider.
    #[error("inference service temporarily degraded: {0}")]
    CircuitOpen(String),

    /// The generated document does not match the approved schema. Retrying
    /// the same image against the same pattern is unlikely to change this;
    /// it indicates a pattern-authoring problem and surfaces to the user.
    #[error("{format} schema mismatch: {detail}")]
    SchemaMismatch {
        format: &'static str,
        detail: String,
    },

    /// The provider call failed after the retry budget was spent (transient)
    /// or immediately (permanent).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A structured-mode response that is not parseable JSON despite the
    /// guaranteed-shape contract.
    #[error("provider returned malformed JSON: {0}")]
    MalformedDocument(String),
}

impl OrchestratorError {
    /// Whether the failure may succeed on queue-level redelivery.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CircuitOpen(_)
                | OrchestratorError::Provider(ProviderError::Transient(_))
        )
    }
}

/// Drives one inference call through the resilience layers and routes the
/// result through structural validation.
pub struct InferenceOrchestrator<P> {
    provider: Arc<P>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
}

impl<P: InferenceProvider> InferenceOrchestrator<P> {
    pub fn new(provider: Arc<P>, breakers: Arc<CircuitBreakerRegistry>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            breakers,
            retry,
        }
    }

    /// Extract a manifest for `pattern` from the image.
    ///
    /// Retries happen *inside* a single breaker-gated attempt window, so a
    /// burst of retried transient failures counts toward tripping the
    /// breaker exactly once per call.
    #[instrument(skip(self, pattern), fields(pattern_id = %pattern.id, format = %pattern.format), err)]
    pub async fn extract(
        &self,
        pattern: &Pattern,
        image_url: &str,
    ) -> Result<ExtractionOutcome, OrchestratorError> {
        let request = InferenceRequest::new(
            image_url,
            pattern.instructions.clone(),
            pattern.format,
            pattern.schema.clone(),
        );

        let breaker = self.breakers.get_or_create(self.provider.name());
        let started = Instant::now();

        let document = breaker
            .execute(|| {
                self.retry
                    .run(ProviderError::is_retryable, || self.provider.infer(&request))
            })
            .await
            .map_err(|e| match e {
                open @ BreakerError::Open { .. } => OrchestratorError::CircuitOpen(open.to_string()),
                BreakerError::Inner(provider_error) => OrchestratorError::Provider(provider_error),
            })?;

        let latency_ms = started.elapsed().as_millis() as u64;

        let manifest = match pattern.format {
            OutputFormat::Json | OutputFormat::Csv => serde_json::from_str(&document)
                .map_err(|e| OrchestratorError::MalformedDocument(e.to_string()))?,
            OutputFormat::Yaml => {
                self.check_structure(&document, pattern, DocumentFormat::Yaml, "YAML")?
            }
            OutputFormat::Xml => {
                self.check_structure(&document, pattern, DocumentFormat::Xml, "XML")?
            }
            OutputFormat::Text => {
                self.check_structure(&document, pattern, DocumentFormat::Text, "text")?
            }
        };

        Ok(ExtractionOutcome {
            manifest,
            raw_document: document,
            latency_ms,
        })
    }

    fn check_structure(
        &self,
        document: &str,
        pattern: &Pattern,
        format: DocumentFormat,
        label: &'static str,
    ) -> Result<JsonValue, OrchestratorError> {
        let report = validate(document, &pattern.schema, format);

        for warning in &report.warnings {
            warn!(pattern_id = %pattern.id, warning, "structural validation warning");
        }

        if !report.is_valid {
            return Err(OrchestratorError::SchemaMismatch {
                format: label,
                detail: report.errors.join("; "),
            });
        }

        Ok(json!({
            "format": pattern.format.as_str(),
            "content": document,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use manifold_resilience::CircuitBreakerConfig;

    struct ScriptedProvider {
        calls: AtomicU32,
        script: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn infer(&self, _request: &InferenceRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(ProviderError::Transient("script exhausted".to_string()));
            }
            script.remove(0)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> InferenceOrchestrator<ScriptedProvider> {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
        }));
        InferenceOrchestrator::new(provider, breakers, fast_retry())
    }

    fn json_pattern() -> Pattern {
        Pattern::new(
            "product",
            OutputFormat::Json,
            "Extract the product.",
            r#"{"type":"object"}"#,
        )
    }

    fn yaml_pattern() -> Pattern {
        Pattern::new(
            "product",
            OutputFormat::Yaml,
            "Extract the product.",
            "title: Widget\nprice: 9.99\ntags:\n  - a\n  - b\n",
        )
    }

    #[tokio::test]
    async fn structured_success_parses_the_manifest() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"title":"Bolt"}"#.to_string())]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let outcome = orchestrator
            .extract(&json_pattern(), "https://img.example/a.png")
            .await
            .unwrap();

        assert_eq!(outcome.manifest["title"], "Bolt");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn freeform_success_wraps_validated_document() {
        let document = "title: Bolt\nprice: 4.5\ntags:\n  - x\n";
        let provider = ScriptedProvider::new(vec![Ok(document.to_string())]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let outcome = orchestrator
            .extract(&yaml_pattern(), "https://img.example/a.png")
            .await
            .unwrap();

        assert_eq!(outcome.manifest["format"], "yaml");
        assert_eq!(outcome.manifest["content"], document);
        assert_eq!(outcome.raw_document, document);
    }

    #[tokio::test]
    async fn schema_mismatch_is_terminal_and_specific() {
        // Missing `tags` relative to the approved schema.
        let provider = ScriptedProvider::new(vec![Ok("title: Bolt\nprice: 4.5\n".to_string())]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let err = orchestrator
            .extract(&yaml_pattern(), "https://img.example/a.png")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "YAML schema mismatch: Missing required key: root.tags"
        );
        assert!(!err.is_transient());
        // The validator rejection is never retried.
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_one_breaker_window() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transient("timeout".to_string())),
            Err(ProviderError::Transient("timeout".to_string())),
            Ok(r#"{"ok":true}"#.to_string()),
        ]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let outcome = orchestrator
            .extract(&json_pattern(), "https://img.example/a.png")
            .await
            .unwrap();

        assert_eq!(outcome.manifest["ok"], true);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Permanent(
            "status 400: bad request".to_string(),
        ))]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let err = orchestrator
            .extract(&json_pattern(), "https://img.example/a.png")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Provider(ProviderError::Permanent(_))
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling_the_provider() {
        let provider = ScriptedProvider::new(vec![]);
        let orchestrator = orchestrator(Arc::clone(&provider));
        let pattern = json_pattern();

        // Each extract spends the 3-attempt retry budget but registers as a
        // single breaker failure; three of them trip the threshold.
        for _ in 0..3 {
            let err = orchestrator
                .extract(&pattern, "https://img.example/a.png")
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        let calls_before = provider.calls();

        let err = orchestrator
            .extract(&pattern, "https://img.example/a.png")
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::CircuitOpen(_)));
        assert!(err.is_transient());
        assert_eq!(provider.calls(), calls_before);
    }

    #[tokio::test]
    async fn malformed_structured_response_is_a_distinct_error() {
        let provider = ScriptedProvider::new(vec![Ok("not json at all".to_string())]);
        let orchestrator = orchestrator(Arc::clone(&provider));

        let err = orchestrator
            .extract(&json_pattern(), "https://img.example/a.png")
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::MalformedDocument(_)));
        assert!(!err.is_transient());
    }
}
