//! Client-supplied idempotency keys.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Maximum accepted key length.
const MAX_KEY_LEN: usize = 255;

/// A validated client-supplied idempotency key.
///
/// Accepted format is `[A-Za-z0-9_-]{1,255}`. Validation happens once at the
/// admission boundary; everything downstream can treat the inner string as
/// well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(DomainError::validation("idempotency key must not be empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(DomainError::validation(format!(
                "idempotency key exceeds {} characters",
                MAX_KEY_LEN
            )));
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(DomainError::validation(format!(
                "idempotency key contains invalid character {:?}",
                bad
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
