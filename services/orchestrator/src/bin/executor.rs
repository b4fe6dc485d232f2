//! Out-of-process execution backend. Launched by the orchestrator's supervisor,
//! which passes the listen port in `EXECUTOR_PORT`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use orchestrator::config::AppConfig;
use orchestrator::{executor_app, ExecutionBackend};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let backend = orchestrator::runtime::start_in_process(&cfg).await?;
    let pool = backend.pool().clone();
    let backend: Arc<dyn ExecutionBackend> = Arc::new(backend);

    let addr = format!("127.0.0.1:{}", cfg.executor_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr=%addr, "executor listening");

    axum::serve(listener, executor_app(backend))
        .with_graceful_shutdown(orchestrator::shutdown_signal())
        .await
        .context("HTTP server failed")?;

    pool.shutdown().await;
    info!("executor: stopped");
    Ok(())
}
