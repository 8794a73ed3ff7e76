//! Provider error taxonomy.

use thiserror::Error;

/// Failure of a single provider call.
///
/// The split drives the retry predicate: transient failures (network,
/// timeout, 429, 5xx) are worth re-attempting, permanent ones (any other
/// 4xx, malformed requests) are not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP response status.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let message = format!("status {}: {}", status, detail);
        if status == 429 || status >= 500 {
            ProviderError::Transient(message)
        } else {
            ProviderError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProviderError::from_status(status.as_u16(), err.to_string());
        }
        // No status: timeouts, connection resets, DNS failures. All of these
        // are worth retrying.
        ProviderError::Transient(err.to_string())
    }
}
