//! OpenAI-compatible chat-completions provider.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::provider::{GenerationMode, InferenceProvider, InferenceRequest};

/// Dependency name registered with the circuit breaker.
const PROVIDER_NAME: &str = "openai-inference";

/// Cap on error-body text carried into error messages.
const ERROR_DETAIL_LIMIT: usize = 512;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-request timeout. Vision calls run for seconds; size generously
    /// but below the queue's visibility timeout.
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OpenAI-style vision inference over HTTP.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn request_body(&self, request: &InferenceRequest) -> Result<JsonValue, ProviderError> {
        let prompt = match request.mode {
            GenerationMode::Structured => request.instructions.clone(),
            GenerationMode::Freeform => format!(
                "{instructions}\n\nProduce a {format} document with exactly the \
                 structure of this approved example, replacing values with what \
                 you extract from the image. Output only the document itself.\n\n\
                 {schema}",
                instructions = request.instructions,
                format = request.format,
                schema = request.schema,
            ),
        };

        let mut body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": request.image_url } },
                ],
            }],
        });

        if request.mode == GenerationMode::Structured {
            // The guaranteed-shape contract: the provider constrains its
            // response to this exact schema.
            let schema: JsonValue = serde_json::from_str(&request.schema).map_err(|e| {
                ProviderError::Permanent(format!("pattern schema is not valid JSON: {}", e))
            })?;
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "manifest",
                    "strict": true,
                    "schema": schema,
                },
            });
        }

        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl InferenceProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip(self, request), fields(format = %request.format), err)]
    async fn infer(&self, request: &InferenceRequest) -> Result<String, ProviderError> {
        let body = self.request_body(request)?;
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut detail = response.text().await.unwrap_or_default();
            detail.truncate(ERROR_DETAIL_LIMIT);
            return Err(ProviderError::from_status(status.as_u16(), detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed provider response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::Transient("provider response contained no content".to_string())
            })?;

        let document = strip_code_fence(&content).to_string();
        debug!(bytes = document.len(), "provider returned document");
        Ok(document)
    }
}

/// Drop a surrounding Markdown code fence if the model added one despite the
/// output-only instruction.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the opening fence line.
    match inner.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::OutputFormat;

    #[test]
    fn strips_fenced_output() {
        assert_eq!(strip_code_fence("```yaml\ntitle: x\n```"), "title: x");
        assert_eq!(strip_code_fence("```\ntitle: x\n```"), "title: x");
        assert_eq!(strip_code_fence("title: x"), "title: x");
    }

    #[test]
    fn structured_request_carries_json_schema_contract() {
        let provider = OpenAiProvider::new(OpenAiConfig::new("k")).unwrap();
        let request = InferenceRequest::new(
            "https://img.example/a.png",
            "Extract the product.",
            OutputFormat::Json,
            r#"{"type":"object","properties":{"title":{"type":"string"}}}"#,
        );

        let body = provider.request_body(&request).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn structured_request_rejects_non_json_schema() {
        let provider = OpenAiProvider::new(OpenAiConfig::new("k")).unwrap();
        let request = InferenceRequest::new(
            "https://img.example/a.png",
            "Extract.",
            OutputFormat::Json,
            "title: not-json",
        );

        let err = provider.request_body(&request).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn freeform_request_embeds_schema_as_example() {
        let provider = OpenAiProvider::new(OpenAiConfig::new("k")).unwrap();
        let request = InferenceRequest::new(
            "https://img.example/a.png",
            "Extract the product.",
            OutputFormat::Yaml,
            "title: Widget\n",
        );

        let body = provider.request_body(&request).unwrap();
        assert!(body.get("response_format").is_none());
        let prompt = body["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("title: Widget"));
        assert!(prompt.contains("yaml"));
    }
}
