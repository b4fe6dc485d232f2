use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use modelops::{CommandResidencyProbe, InferenceRuntime, ModelInstance, OllamaRuntime, ResourcePool, SystemMemory};

use crate::backend::InProcessBackend;
use crate::config::AppConfig;

/// Build the pool and fallback model from config, load pinned models, and
/// wrap them as an in-process backend. Fails if any pinned model is not resident.
pub async fn start_in_process(cfg: &AppConfig) -> Result<InProcessBackend> {
    let runtime: Arc<dyn InferenceRuntime> = Arc::new(OllamaRuntime::new(cfg.ollama_url.clone()));
    let residency = CommandResidencyProbe::from_command_line(&cfg.residency_command)
        .context("RESIDENCY_COMMAND must name a program")?;

    let pool = ResourcePool::new(
        cfg.pool_config(),
        cfg.instance_specs(),
        runtime.clone(),
        Arc::new(SystemMemory::new()),
        Arc::new(residency),
    )
    .context("Invalid model pool configuration")?;

    if !pool.initialize().await {
        bail!("Model pool failed to initialize (pinned models not resident)");
    }
    let pinned: Vec<String> = pool.pinned_roles().iter().map(|r| r.to_string()).collect();
    info!(pinned=?pinned, fallback=%cfg.fallback_model, runtime=%runtime.info().base_url, "runtime: model pool ready");

    let fallback = Arc::new(ModelInstance::new(cfg.fallback_spec(), runtime));
    Ok(InProcessBackend::new(Arc::new(pool), fallback, cfg.generate_timeout))
}
