use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use modelops::{InstanceSpec, PoolConfig, Role, DEFAULT_MIN_RESIDENT_MB};

use crate::orchestrator_task::OrchestratorSettings;
use crate::supervisor::{BackendSpec, RestartPolicy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    InProcess,
    Supervised,
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_process" => Ok(ExecutionMode::InProcess),
            "supervised" => Ok(ExecutionMode::Supervised),
            other => bail!("EXECUTION_MODE must be in_process or supervised, got {other}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub ollama_url: String,

    pub conversation_model: String,
    pub conversation_model_mb: u64,
    pub execution_model: String,
    pub execution_model_mb: u64,
    pub pin_execution_model: bool,
    pub fallback_model: String,
    pub min_resident_mb: f64,
    pub residency_command: String,

    pub max_retries: u32,
    pub retry_delay: Duration,
    pub task_timeout: Duration,
    pub generate_timeout: Duration,
    pub monitor_interval: Duration,
    pub max_task_chars: usize,

    pub execution_mode: ExecutionMode,
    pub executor_bin: String,
    pub executor_port: u16,
    pub supervisor_poll: Duration,
    pub supervisor_max_restarts: u32,
    pub supervisor_backoff: Duration,
    pub supervisor_stable_after: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = var_or("ORCH_BIND_ADDR", "0.0.0.0:8080");
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let ollama_url = var_or("OLLAMA_URL", "http://127.0.0.1:11434");

        let conversation_model = var_or("CONVERSATION_MODEL", "llama3.1:8b");
        let conversation_model_mb = parse_or("CONVERSATION_MODEL_MB", 6000)?;
        let execution_model = var_or("EXECUTION_MODEL", "qwen2.5-coder:7b");
        let execution_model_mb = parse_or("EXECUTION_MODEL_MB", 5500)?;
        let pin_execution_model = flag("PIN_EXECUTION_MODEL", false);
        let fallback_model = std::env::var("FALLBACK_MODEL").unwrap_or_else(|_| conversation_model.clone());
        let min_resident_mb = parse_or("MIN_RESIDENT_MB", DEFAULT_MIN_RESIDENT_MB)?;
        let residency_command = var_or("RESIDENCY_COMMAND", "ollama ps");

        let max_retries = parse_or("MAX_RETRIES", 3)?;
        let retry_delay = Duration::from_secs(parse_or("RETRY_DELAY_SECS", 2)?);
        let task_timeout = Duration::from_secs(parse_or("TASK_TIMEOUT_SECS", 300)?);
        let generate_timeout = Duration::from_secs(parse_or("GENERATE_TIMEOUT_SECS", 300)?);
        let monitor_interval = Duration::from_secs(parse_or("MONITOR_INTERVAL_SECS", 5)?);
        let max_task_chars = parse_or("MAX_TASK_CHARS", 10_000)?;

        let execution_mode: ExecutionMode = var_or("EXECUTION_MODE", "in_process").parse()?;
        let executor_bin = match std::env::var("EXECUTOR_BIN") {
            Ok(v) => v,
            Err(_) => sibling_executor()?,
        };
        let executor_port = parse_or("EXECUTOR_PORT", 8091)?;
        let supervisor_poll = Duration::from_secs(parse_or("SUPERVISOR_POLL_SECS", 5)?);
        let supervisor_max_restarts = parse_or("SUPERVISOR_MAX_RESTARTS", 5)?;
        let supervisor_backoff = Duration::from_millis(parse_or("SUPERVISOR_BACKOFF_MS", 1000)?);
        let supervisor_stable_after = Duration::from_secs(parse_or("SUPERVISOR_STABLE_AFTER_SECS", 60)?);

        // Tiny sanity checks (fail fast, fail loud)
        if !ollama_url.starts_with("http://") && !ollama_url.starts_with("https://") {
            bail!("OLLAMA_URL must start with http:// or https://");
        }
        if max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }
        if monitor_interval.is_zero() || supervisor_poll.is_zero() {
            bail!("MONITOR_INTERVAL_SECS and SUPERVISOR_POLL_SECS must be positive");
        }
        if residency_command.split_whitespace().next().is_none() {
            bail!("RESIDENCY_COMMAND must not be empty");
        }

        Ok(Self {
            bind_addr,
            database_url,
            ollama_url,
            conversation_model,
            conversation_model_mb,
            execution_model,
            execution_model_mb,
            pin_execution_model,
            fallback_model,
            min_resident_mb,
            residency_command,
            max_retries,
            retry_delay,
            task_timeout,
            generate_timeout,
            monitor_interval,
            max_task_chars,
            execution_mode,
            executor_bin,
            executor_port,
            supervisor_poll,
            supervisor_max_restarts,
            supervisor_backoff,
            supervisor_stable_after,
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig { min_resident_mb: self.min_resident_mb, ..PoolConfig::default() }
    }

    /// Conversation is always pinned; execution only when configured.
    pub fn instance_specs(&self) -> Vec<InstanceSpec> {
        let execution = InstanceSpec {
            role: Role::execution(),
            identifier: self.execution_model.clone(),
            pinned: self.pin_execution_model,
            memory_estimate_mb: self.execution_model_mb,
        };
        vec![
            InstanceSpec::pinned(Role::CONVERSATION, &self.conversation_model, self.conversation_model_mb),
            execution,
        ]
    }

    /// The fallback is a pool outsider; it is loaded on first use.
    pub fn fallback_spec(&self) -> InstanceSpec {
        InstanceSpec::evictable("fallback-model", &self.fallback_model, self.conversation_model_mb)
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            task_timeout: self.task_timeout,
            max_task_chars: self.max_task_chars,
        }
    }

    pub fn backend_spec(&self) -> BackendSpec {
        BackendSpec::new(&self.executor_bin, self.executor_port)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.supervisor_max_restarts,
            backoff: self.supervisor_backoff,
            stable_after: self.supervisor_stable_after,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(default)
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("Invalid value for env var {key}: {v}")),
        Err(_) => Ok(default),
    }
}

fn sibling_executor() -> Result<String> {
    let exe = std::env::current_exe().context("Cannot locate current executable")?;
    let dir = exe.parent().context("Current executable has no parent directory")?;
    Ok(dir.join("executor").to_string_lossy().into_owned())
}
