pub mod backend;
pub mod backend_remote;
pub mod config;
pub mod error;
pub mod monitor_loop;
pub mod orchestrator_task;
pub mod routes_runtime;
pub mod routes_tasks;
pub mod runtime;
pub mod state;
pub mod supervisor;
pub mod task_store;
pub mod task_store_pg;
pub mod tools;
pub mod types_tasks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub use backend::{BackendStatus, ExecutionBackend, InProcessBackend};
pub use backend_remote::RemoteBackend;
pub use error::{ErrorKind, RemoteTaskError, TaskError};
pub use orchestrator_task::{Execution, OrchestratorSettings, ServerStatus, TaskOrchestrator};
pub use state::{AppState, SharedState};
pub use supervisor::{BackendHandle, BackendSpec, RestartPolicy, ServiceSupervisor, SupervisorHealth};
pub use task_store::{MemoryTaskStore, TaskStore};
pub use task_store_pg::PgTaskStore;
pub use types_tasks::{ActiveTaskRecord, OutcomeStatus, Task, TaskOutcome, TaskStatus};

/// HTTP surface of the orchestrator service.
pub fn orchestrator_app(state: SharedState) -> Router {
    let registry = Arc::new(tools::orchestrator_tools(state.orchestrator.clone()));

    Router::new()
        .route("/health", get(routes_runtime::get_health))
        .route("/status", get(routes_runtime::get_status))
        .route("/tasks", post(routes_tasks::create_task))
        .route("/tasks/active", get(routes_tasks::list_active))
        .route("/tasks/:id", get(routes_tasks::get_task))
        .route("/tasks/:id/delegate", post(routes_tasks::delegate_task))
        .with_state(state)
        .merge(dispatch::router(registry))
        .layer(CorsLayer::permissive())
}

/// HTTP surface of the executor service.
pub fn executor_app(backend: Arc<dyn ExecutionBackend>) -> Router {
    let registry = Arc::new(tools::executor_tools(backend.clone()));

    Router::new()
        .route("/health", get(routes_runtime::executor_health))
        .with_state(backend)
        .merge(dispatch::router(registry))
        .layer(CorsLayer::permissive())
}

/// Resolves on Ctrl-C, or SIGTERM on unix (how the supervisor stops the executor).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error=%e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error=%e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
