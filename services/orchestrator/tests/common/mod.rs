#![allow(dead_code)]

use async_trait::async_trait;
use modelops::{
    ChatTurn, InferenceRuntime, InstanceSpec, MemoryProbe, ModelError, ModelInstance, PoolConfig, ResidencyProbe,
    ResidentModel, ResourcePool, Role, RuntimeError, RuntimeInfo,
};
use orchestrator::{
    BackendStatus, ExecutionBackend, InProcessBackend, MemoryTaskStore, OrchestratorSettings, TaskError,
    TaskOrchestrator,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const CHAT_MODEL: &str = "chat-m";
pub const EXEC_MODEL: &str = "exec-m";
pub const FALLBACK_MODEL: &str = "fallback-m";

/// Inference runtime with per-model failure scripts and call counters.
#[derive(Default)]
pub struct FakeRuntime {
    loads: Mutex<HashMap<String, u32>>,
    generates: Mutex<HashMap<String, u32>>,
    fail_next_loads: Mutex<HashMap<String, u32>>,
    broken_loads: Mutex<HashSet<String>>,
    broken_generates: Mutex<HashSet<String>>,
    slow_generates: Mutex<HashMap<String, Duration>>,
    slow_loads: Mutex<HashMap<String, Duration>>,
}

impl FakeRuntime {
    pub fn fail_next_loads(&self, model: &str, n: u32) {
        self.fail_next_loads.lock().unwrap().insert(model.to_string(), n);
    }

    pub fn break_load(&self, model: &str) {
        self.broken_loads.lock().unwrap().insert(model.to_string());
    }

    pub fn break_generate(&self, model: &str) {
        self.broken_generates.lock().unwrap().insert(model.to_string());
    }

    pub fn slow_generate(&self, model: &str, d: Duration) {
        self.slow_generates.lock().unwrap().insert(model.to_string(), d);
    }

    pub fn slow_load(&self, model: &str, d: Duration) {
        self.slow_loads.lock().unwrap().insert(model.to_string(), d);
    }

    pub fn load_count(&self, model: &str) -> u32 {
        self.loads.lock().unwrap().get(model).copied().unwrap_or(0)
    }

    pub fn generate_count(&self, model: &str) -> u32 {
        self.generates.lock().unwrap().get(model).copied().unwrap_or(0)
    }
}

#[async_trait]
impl InferenceRuntime for FakeRuntime {
    async fn load(&self, model: &str) -> Result<(), RuntimeError> {
        *self.loads.lock().unwrap().entry(model.to_string()).or_default() += 1;

        let delay = self.slow_loads.lock().unwrap().get(model).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        if self.broken_loads.lock().unwrap().contains(model) {
            return Err(RuntimeError::Other(format!("{model} is broken")));
        }
        let mut pending = self.fail_next_loads.lock().unwrap();
        if let Some(n) = pending.get_mut(model) {
            if *n > 0 {
                *n -= 1;
                return Err(RuntimeError::Other(format!("{model} failed to load")));
            }
        }
        Ok(())
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, RuntimeError> {
        *self.generates.lock().unwrap().entry(model.to_string()).or_default() += 1;

        let delay = self.slow_generates.lock().unwrap().get(model).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.broken_generates.lock().unwrap().contains(model) {
            return Err(RuntimeError::Other(format!("{model} crashed")));
        }
        Ok(format!("{model}: {prompt}"))
    }

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String, RuntimeError> {
        Ok(format!("{model}: {} turns", turns.len()))
    }

    async fn health(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo { name: "fake".into(), base_url: "fake://".into() }
    }
}

pub struct PlentyMemory;

#[async_trait]
impl MemoryProbe for PlentyMemory {
    async fn available_mb(&self) -> u64 {
        100_000
    }

    async fn total_mb(&self) -> u64 {
        128_000
    }
}

pub struct StaticResidency(pub Vec<ResidentModel>);

#[async_trait]
impl ResidencyProbe for StaticResidency {
    async fn snapshot(&self) -> Result<Vec<ResidentModel>, ModelError> {
        Ok(self.0.clone())
    }
}

/// Conversation pinned, execution evictable, nothing loaded yet.
pub fn in_process_backend(rt: Arc<FakeRuntime>, call_timeout: Duration) -> InProcessBackend {
    let specs = vec![
        InstanceSpec::pinned(Role::CONVERSATION, CHAT_MODEL, 2000),
        InstanceSpec::evictable(Role::EXECUTION, EXEC_MODEL, 3000),
    ];
    let residency = StaticResidency(vec![ResidentModel { name: CHAT_MODEL.into(), size_mb: 2000.0 }]);
    let pool = ResourcePool::new(PoolConfig::default(), specs, rt.clone(), Arc::new(PlentyMemory), Arc::new(residency))
        .unwrap();
    let fallback = Arc::new(ModelInstance::new(InstanceSpec::evictable("fallback-model", FALLBACK_MODEL, 2000), rt));
    InProcessBackend::new(Arc::new(pool), fallback, call_timeout)
}

/// Backend that replays a fixed list of results.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, TaskError>>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    call_times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, TaskError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(script: Vec<Result<String, TaskError>>, delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::new(script) }
    }

    pub fn failing(n: usize) -> Self {
        Self::new((0..n).map(|i| Err(TaskError::ModelExecution(format!("failure {}", i + 1)))).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn execute(&self, _task_id: Uuid, _text: &str) -> Result<String, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(TaskError::ModelExecution("script exhausted".into())))
    }

    async fn describe(&self) -> BackendStatus {
        BackendStatus { kind: "scripted".into(), healthy: true, detail: serde_json::Value::Null }
    }
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings { retry_delay: Duration::from_millis(10), ..OrchestratorSettings::default() }
}

pub fn build_orchestrator(
    backend: Arc<dyn ExecutionBackend>,
    settings: OrchestratorSettings,
) -> (Arc<TaskOrchestrator>, Arc<MemoryTaskStore>) {
    let store = Arc::new(MemoryTaskStore::new());
    let orch = Arc::new(TaskOrchestrator::new(store.clone(), backend, settings));
    (orch, store)
}
