use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{ChatTurn, InferenceRuntime, InstanceSpec, ModelError, ResidencyState, Result, Role};

#[derive(Debug, Clone)]
struct InstanceState {
    residency: ResidencyState,
    last_used_at: Option<DateTime<Utc>>,
    last_load_duration_sec: Option<f64>,
}

/// Read-only view of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub role: Role,
    pub identifier: String,
    pub pinned: bool,
    pub memory_estimate_mb: u64,
    pub state: ResidencyState,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_load_duration_sec: Option<f64>,
}

/// One named model behind an inference runtime.
pub struct ModelInstance {
    spec: InstanceSpec,
    runtime: Arc<dyn InferenceRuntime>,
    // Held across the runtime load call: at most one load per role at a time.
    load_gate: Mutex<()>,
    state: RwLock<InstanceState>,
}

impl ModelInstance {
    pub fn new(spec: InstanceSpec, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            spec,
            runtime,
            load_gate: Mutex::new(()),
            state: RwLock::new(InstanceState {
                residency: ResidencyState::Unloaded,
                last_used_at: None,
                last_load_duration_sec: None,
            }),
        }
    }

    pub fn role(&self) -> &Role {
        &self.spec.role
    }

    pub fn identifier(&self) -> &str {
        &self.spec.identifier
    }

    pub fn is_pinned(&self) -> bool {
        self.spec.pinned
    }

    pub fn memory_estimate_mb(&self) -> u64 {
        self.spec.memory_estimate_mb
    }

    pub async fn residency(&self) -> ResidencyState {
        self.state.read().await.residency
    }

    pub async fn is_loaded(&self) -> bool {
        self.residency().await == ResidencyState::Loaded
    }

    pub async fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_used_at
    }

    /// Idempotent. Returns false (state left `unloaded`) when the runtime refuses.
    pub async fn load(&self) -> bool {
        let _gate = self.load_gate.lock().await;

        if self.state.read().await.residency == ResidencyState::Loaded {
            return true;
        }
        self.state.write().await.residency = ResidencyState::Loading;

        let started = Instant::now();
        match self.runtime.load(&self.spec.identifier).await {
            Ok(()) => {
                let secs = started.elapsed().as_secs_f64();
                let mut st = self.state.write().await;
                st.residency = ResidencyState::Loaded;
                st.last_load_duration_sec = Some(secs);
                info!(role=%self.spec.role, model=%self.spec.identifier, secs, "instance: loaded");
                true
            }
            Err(e) => {
                self.state.write().await.residency = ResidencyState::Unloaded;
                warn!(role=%self.spec.role, model=%self.spec.identifier, error=%e, "instance: load failed");
                false
            }
        }
    }

    /// Bookkeeping only: the runtime has no unload call, so memory is not
    /// known to be freed until residency is checked again.
    pub async fn unload(&self) -> bool {
        if self.spec.pinned {
            warn!(role=%self.spec.role, "instance: refusing to unload pinned model");
            return false;
        }

        let _gate = self.load_gate.lock().await;
        self.state.write().await.residency = ResidencyState::Unloaded;
        debug!(role=%self.spec.role, "instance: unloaded");
        true
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded().await || self.load().await {
            return Ok(());
        }
        Err(ModelError::ResourceUnavailable {
            role: self.spec.role.clone(),
            reason: format!("runtime failed to load {}", self.spec.identifier),
        })
    }

    async fn touch(&self) {
        self.state.write().await.last_used_at = Some(Utc::now());
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        self.ensure_loaded().await?;
        self.touch().await;

        self.runtime
            .generate(&self.spec.identifier, prompt)
            .await
            .map_err(|source| ModelError::Execution { role: self.spec.role.clone(), source })
    }

    pub async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
        self.ensure_loaded().await?;
        self.touch().await;

        self.runtime
            .chat(&self.spec.identifier, turns)
            .await
            .map_err(|source| ModelError::Execution { role: self.spec.role.clone(), source })
    }

    pub async fn is_healthy(&self) -> bool {
        match self.runtime.health().await {
            Ok(()) => true,
            Err(e) => {
                warn!(role=%self.spec.role, error=%e, "instance: health probe failed");
                false
            }
        }
    }

    pub async fn status(&self) -> InstanceStatus {
        let st = self.state.read().await.clone();
        InstanceStatus {
            role: self.spec.role.clone(),
            identifier: self.spec.identifier.clone(),
            pinned: self.spec.pinned,
            memory_estimate_mb: self.spec.memory_estimate_mb,
            state: st.residency,
            last_used_at: st.last_used_at,
            last_load_duration_sec: st.last_load_duration_sec,
        }
    }
}
