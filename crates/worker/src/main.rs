use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use manifold_inference::{InferenceOrchestrator, OpenAiConfig, OpenAiProvider};
use manifold_queue::PostgresWorkQueue;
use manifold_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
use manifold_worker::{PostgresJobStore, PostgresPatternStore, Worker, WorkerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    manifold_observability::init();

    let settings = WorkerSettings::from_env();
    let database_url = settings
        .database_url
        .clone()
        .context("MANIFOLD_DATABASE_URL is not set")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    let queue = PostgresWorkQueue::new(pool.clone());
    queue.ensure_schema().await?;
    let jobs = PostgresJobStore::new(pool.clone());
    jobs.ensure_schema().await?;
    let patterns = PostgresPatternStore::new(pool);
    patterns.ensure_schema().await?;

    let mut provider_config = OpenAiConfig::new(settings.openai_api_key.clone());
    if let Some(base_url) = settings.openai_base_url.clone() {
        provider_config = provider_config.with_base_url(base_url);
    }
    if let Some(model) = settings.openai_model.clone() {
        provider_config = provider_config.with_model(model);
    }
    let provider =
        Arc::new(OpenAiProvider::new(provider_config).context("failed to build provider")?);

    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let orchestrator = Arc::new(InferenceOrchestrator::new(
        provider,
        breakers,
        RetryPolicy::default(),
    ));

    let worker = Worker::new(
        Arc::new(jobs),
        Arc::new(patterns),
        Arc::new(queue),
        orchestrator,
        settings.worker.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
