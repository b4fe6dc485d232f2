use async_trait::async_trait;
use modelops::{ModelInstance, PoolHealth, PoolStatus, ResourcePool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TaskError;

/// Category the orchestrator asks the pool for when running a task.
pub const EXECUTION_CATEGORY: &str = "execution";

/// One attempt at running a task's text. Retry policy lives above this.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, task_id: Uuid, text: &str) -> Result<String, TaskError>;
    async fn describe(&self) -> BackendStatus;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub kind: String,
    pub healthy: bool,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProcessStatus {
    pub pool: PoolStatus,
    pub health: PoolHealth,
    pub fallback_model: String,
    pub fallback_loaded: bool,
}

/// Pool path first, then a single always-available model if the pool path
/// errors or overruns the per-call timeout.
pub struct InProcessBackend {
    pool: Arc<ResourcePool>,
    fallback: Arc<ModelInstance>,
    call_timeout: Duration,
}

impl InProcessBackend {
    pub fn new(pool: Arc<ResourcePool>, fallback: Arc<ModelInstance>, call_timeout: Duration) -> Self {
        Self { pool, fallback, call_timeout }
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    // Admission and loading count against the per-call budget too: a load
    // that never returns would otherwise hold the pool's admission lock forever.
    async fn pool_path(&self, text: &str) -> Result<String, TaskError> {
        let attempt = async {
            let inst = self.pool.get_model(EXECUTION_CATEGORY).await?;
            Ok::<_, TaskError>(inst.generate(text).await?)
        };
        match timeout(self.call_timeout, attempt).await {
            Ok(res) => res,
            Err(_) => Err(TaskError::TaskTimeout(format!(
                "{} did not answer within {:?}",
                self.pool.route(EXECUTION_CATEGORY),
                self.call_timeout
            ))),
        }
    }

    async fn fallback_path(&self, text: &str) -> Result<String, TaskError> {
        match timeout(self.call_timeout, self.fallback.generate(text)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(TaskError::TaskTimeout(format!(
                "fallback {} did not answer within {:?}",
                self.fallback.identifier(),
                self.call_timeout
            ))),
        }
    }
}

#[async_trait]
impl ExecutionBackend for InProcessBackend {
    async fn execute(&self, task_id: Uuid, text: &str) -> Result<String, TaskError> {
        match self.pool_path(text).await {
            Ok(out) => {
                debug!(task_id=%task_id, "backend: pool path answered");
                Ok(out)
            }
            Err(e) => {
                warn!(task_id=%task_id, error=%e, fallback=%self.fallback.identifier(), "backend: pool path failed, using fallback");
                self.fallback_path(text).await
            }
        }
    }

    async fn describe(&self) -> BackendStatus {
        let health = self.pool.health_check().await;
        let status = InProcessStatus {
            pool: self.pool.status().await,
            health: health.clone(),
            fallback_model: self.fallback.identifier().to_string(),
            fallback_loaded: self.fallback.is_loaded().await,
        };
        BackendStatus {
            kind: "in_process".to_string(),
            healthy: health.is_healthy(),
            detail: serde_json::to_value(status).unwrap_or_default(),
        }
    }
}
