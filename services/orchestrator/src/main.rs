use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use orchestrator::config::{AppConfig, ExecutionMode};
use orchestrator::{
    orchestrator_app, AppState, ExecutionBackend, MemoryTaskStore, PgTaskStore, RemoteBackend, ServiceSupervisor,
    TaskOrchestrator, TaskStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Task store ---
    let store: Arc<dyn TaskStore> = match &cfg.database_url {
        Some(url) => {
            let pg_pool = PgPool::connect(url).await.context("Failed to connect to Postgres")?;
            let store = PgTaskStore::new(pg_pool);
            store.migrate().await.context("Failed to run migrations")?;
            store.ping().await.context("Postgres ping failed")?;
            info!("postgres: ok");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, tasks are kept in memory");
            Arc::new(MemoryTaskStore::new())
        }
    };

    // --- Execution backend ---
    let cancel = CancellationToken::new();
    let mut supervisor: Option<Arc<ServiceSupervisor>> = None;
    let mut pool = None;

    let backend: Arc<dyn ExecutionBackend> = match cfg.execution_mode {
        ExecutionMode::InProcess => {
            let backend = orchestrator::runtime::start_in_process(&cfg).await?;
            pool = Some(backend.pool().clone());
            Arc::new(backend)
        }
        ExecutionMode::Supervised => {
            let sup = Arc::new(ServiceSupervisor::new(cfg.backend_spec(), cfg.restart_policy()));
            // A failed first launch is retried by the poll loop.
            if let Err(e) = sup.start().await {
                error!(error=%e, "supervisor: initial launch failed");
            }
            let poll_sup = sup.clone();
            let poll_every = cfg.supervisor_poll;
            let poll_cancel = cancel.clone();
            tokio::spawn(async move { poll_sup.run(poll_every, poll_cancel).await });

            supervisor = Some(sup.clone());
            // The executor inherits this environment, so it runs with the same per-call timeout.
            let remote = RemoteBackend::new(sup, cfg.generate_timeout);
            info!(budget=?remote.call_budget(), "supervisor: remote call budget");
            Arc::new(remote)
        }
    };

    let orchestrator = Arc::new(TaskOrchestrator::new(store, backend, cfg.settings()));

    // RECOVERY: fail tasks a previous run left running
    match orchestrator.recover_orphans().await {
        Ok(0) => {}
        Ok(n) => warn!(count = n, "orchestrator: failed orphaned tasks"),
        Err(e) => warn!(error=%e, "orchestrator: orphan recovery failed"),
    }

    // Spawn timeout monitor
    let monitor = tokio::spawn(orchestrator::monitor_loop::run_monitor_loop(
        orchestrator.clone(),
        cfg.monitor_interval,
        cancel.clone(),
    ));

    let app = orchestrator_app(Arc::new(AppState::new(orchestrator, supervisor.clone())));

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr=%addr, mode=?cfg.execution_mode, "orchestrator listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            orchestrator::shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;

    // Cleanup
    cancel.cancel();
    if let Err(e) = monitor.await {
        warn!(error=%e, "monitor_loop: join failed");
    }
    if let Some(sup) = supervisor {
        sup.shutdown().await;
    }
    if let Some(pool) = pool {
        pool.shutdown().await;
    }
    info!("orchestrator: stopped");
    Ok(())
}
