//! Pattern storage.
//!
//! Patterns are authored and approved upstream; the worker only ever reads
//! them, so the trait is deliberately lookup-shaped. The in-memory store
//! doubles as the seeding mechanism for tests and dev runs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use manifold_core::{Pattern, PatternId};

/// Pattern store failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternStoreError {
    #[error("pattern store {operation} failed: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("stored pattern is corrupt: {0}")]
    Corrupt(String),
}

impl PatternStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        PatternStoreError::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Read access to approved patterns.
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn get(&self, pattern_id: PatternId) -> Result<Option<Pattern>, PatternStoreError>;
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    patterns: RwLock<HashMap<PatternId, Pattern>>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, pattern: Pattern) {
        self.patterns.write().unwrap().insert(pattern.id, pattern);
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn get(&self, pattern_id: PatternId) -> Result<Option<Pattern>, PatternStoreError> {
        Ok(self.patterns.read().unwrap().get(&pattern_id).cloned())
    }
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PostgresPatternStore {
    pool: Arc<PgPool>,
}

impl PostgresPatternStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the patterns table if absent.
    pub async fn ensure_schema(&self) -> Result<(), PatternStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                pattern_id   UUID PRIMARY KEY,
                name         TEXT NOT NULL,
                format       TEXT NOT NULL,
                instructions TEXT NOT NULL,
                schema       TEXT NOT NULL,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| PatternStoreError::storage("ensure_schema", e.to_string()))?;
        Ok(())
    }

    /// Insert or replace a pattern (used by seeding, not the worker path).
    pub async fn upsert(&self, pattern: &Pattern) -> Result<(), PatternStoreError> {
        sqlx::query(
            r#"
            INSERT INTO patterns (pattern_id, name, format, instructions, schema)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (pattern_id) DO UPDATE
            SET name = EXCLUDED.name,
                format = EXCLUDED.format,
                instructions = EXCLUDED.instructions,
                schema = EXCLUDED.schema
            "#,
        )
        .bind(pattern.id.as_uuid())
        .bind(&pattern.name)
        .bind(pattern.format.as_str())
        .bind(&pattern.instructions)
        .bind(&pattern.schema)
        .execute(&*self.pool)
        .await
        .map_err(|e| PatternStoreError::storage("upsert", e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PatternStore for PostgresPatternStore {
    #[instrument(skip(self), err)]
    async fn get(&self, pattern_id: PatternId) -> Result<Option<Pattern>, PatternStoreError> {
        let row = sqlx::query(
            "SELECT pattern_id, name, format, instructions, schema FROM patterns WHERE pattern_id = $1",
        )
        .bind(pattern_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| PatternStoreError::storage("get", e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let map_err = |e: sqlx::Error| PatternStoreError::storage("get", e.to_string());
        let id: uuid::Uuid = row.try_get("pattern_id").map_err(map_err)?;
        let name: String = row.try_get("name").map_err(map_err)?;
        let format: String = row.try_get("format").map_err(map_err)?;
        let instructions: String = row.try_get("instructions").map_err(map_err)?;
        let schema: String = row.try_get("schema").map_err(map_err)?;

        Ok(Some(Pattern {
            id: PatternId::from_uuid(id),
            name,
            format: format
                .parse()
                .map_err(|e| PatternStoreError::Corrupt(format!("{}: {}", id, e)))?,
            instructions,
            schema,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::OutputFormat;

    #[tokio::test]
    async fn lookup_round_trip() {
        let store = InMemoryPatternStore::new();
        let pattern = Pattern::new("receipt", OutputFormat::Yaml, "Extract.", "total: 0\n");
        let id = pattern.id;
        store.insert(pattern.clone());

        assert_eq!(store.get(id).await.unwrap(), Some(pattern));
        assert_eq!(store.get(PatternId::new()).await.unwrap(), None);
    }
}
