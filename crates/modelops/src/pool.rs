//! Admission control and eviction over a fixed registry of model instances.
//!
//! Pinned and evictable instances live in separate maps. Eviction only ever
//! walks the evictable map, so a pinned role is never an eviction candidate.
//! All admission/eviction/load decisions run under one admission lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::residency::validate_residency;
use crate::{
    InferenceRuntime, InstanceSpec, InstanceStatus, MemoryProbe, ModelError, ModelInstance, PoolConfig,
    ResidencyProbe, Result, Role, CONVERSATION_CATEGORY,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub instances: Vec<InstanceStatus>,
    pub pinned_roles: BTreeSet<Role>,
    pub loaded_roles: BTreeSet<Role>,
    pub initialized_at: Option<DateTime<Utc>>,
    pub available_mb: u64,
    pub total_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealth {
    pub runtime_healthy: bool,
    pub initialized: bool,
    pub pinned_loaded: bool,
}

impl PoolHealth {
    pub fn is_healthy(&self) -> bool {
        self.runtime_healthy && self.initialized && self.pinned_loaded
    }
}

pub struct ResourcePool {
    config: PoolConfig,
    pinned: BTreeMap<Role, Arc<ModelInstance>>,
    evictable: BTreeMap<Role, Arc<ModelInstance>>,
    runtime: Arc<dyn InferenceRuntime>,
    memory: Arc<dyn MemoryProbe>,
    residency: Arc<dyn ResidencyProbe>,
    admission: Mutex<()>,
    initialized_at: RwLock<Option<DateTime<Utc>>>,
}

impl ResourcePool {
    pub fn new(
        config: PoolConfig,
        specs: Vec<InstanceSpec>,
        runtime: Arc<dyn InferenceRuntime>,
        memory: Arc<dyn MemoryProbe>,
        residency: Arc<dyn ResidencyProbe>,
    ) -> Result<Self> {
        let instances = specs
            .into_iter()
            .map(|spec| Arc::new(ModelInstance::new(spec, runtime.clone())))
            .collect();
        Self::from_instances(config, instances, runtime, memory, residency)
    }

    /// Build over already constructed instances. Both routing roles must be registered.
    pub fn from_instances(
        config: PoolConfig,
        instances: Vec<Arc<ModelInstance>>,
        runtime: Arc<dyn InferenceRuntime>,
        memory: Arc<dyn MemoryProbe>,
        residency: Arc<dyn ResidencyProbe>,
    ) -> Result<Self> {
        let mut pinned = BTreeMap::new();
        let mut evictable = BTreeMap::new();

        for inst in instances {
            let role = inst.role().clone();
            if pinned.contains_key(&role) || evictable.contains_key(&role) {
                return Err(ModelError::ResourceUnavailable {
                    role,
                    reason: "role registered twice".to_string(),
                });
            }
            if inst.is_pinned() {
                pinned.insert(role, inst);
            } else {
                evictable.insert(role, inst);
            }
        }

        for role in [&config.conversation_role, &config.execution_role] {
            if !pinned.contains_key(role) && !evictable.contains_key(role) {
                return Err(ModelError::UnknownRole(role.clone()));
            }
        }

        Ok(Self {
            config,
            pinned,
            evictable,
            runtime,
            memory,
            residency,
            admission: Mutex::new(()),
            initialized_at: RwLock::new(None),
        })
    }

    /// Load every pinned instance concurrently, then confirm with the runtime that they are resident.
    pub async fn initialize(&self) -> bool {
        let loads = self.pinned.values().map(|inst| async move { (inst.role().clone(), inst.load().await) });
        let results = futures::future::join_all(loads).await;

        let failed: Vec<Role> = results.into_iter().filter(|(_, ok)| !ok).map(|(role, _)| role).collect();
        for role in &failed {
            error!(role=%role, "pool: pinned model failed to load");
        }
        if !failed.is_empty() {
            error!(failed = failed.len(), total = self.pinned.len(), "pool: initialization failed");
            return false;
        }

        if let Err(e) = self.validate_residency().await {
            error!(error=%e, "pool: residency validation failed");
            return false;
        }

        *self.initialized_at.write().await = Some(Utc::now());
        info!(pinned = self.pinned.len(), evictable = self.evictable.len(), "pool: initialized");
        true
    }

    pub async fn validate_residency(&self) -> Result<()> {
        if self.pinned.is_empty() {
            return Ok(());
        }
        let snapshot = self.residency.snapshot().await?;
        let ids: Vec<&str> = self.pinned.values().map(|i| i.identifier()).collect();
        validate_residency(&ids, &snapshot, self.config.min_resident_mb).map_err(ModelError::Residency)
    }

    /// Total over all inputs: one category chats, everything else executes.
    pub fn route(&self, category: &str) -> &Role {
        if category.trim().eq_ignore_ascii_case(CONVERSATION_CATEGORY) {
            &self.config.conversation_role
        } else {
            &self.config.execution_role
        }
    }

    pub fn instance(&self, role: &Role) -> Result<Arc<ModelInstance>> {
        self.pinned
            .get(role)
            .or_else(|| self.evictable.get(role))
            .cloned()
            .ok_or_else(|| ModelError::UnknownRole(role.clone()))
    }

    /// Resolve a category to a loaded instance, loading on demand.
    pub async fn get_model(&self, category: &str) -> Result<Arc<ModelInstance>> {
        let role = self.route(category).clone();
        let inst = self.instance(&role)?;
        if !inst.is_loaded().await {
            self.admit(&role).await?;
        }
        Ok(inst)
    }

    pub async fn load_model(&self, role: &Role) -> bool {
        match self.admit(role).await {
            Ok(()) => true,
            Err(e) => {
                warn!(role=%role, error=%e, "pool: load refused");
                false
            }
        }
    }

    async fn admit(&self, role: &Role) -> Result<()> {
        let inst = self.instance(role)?;
        let _guard = self.admission.lock().await;

        // Another caller may have finished the load while we waited for the lock.
        if inst.is_loaded().await {
            return Ok(());
        }

        if !inst.is_pinned() {
            let required = inst.memory_estimate_mb();
            let available = self.memory.available_mb().await;
            if required > available {
                info!(role=%role, required, available, "pool: not enough memory, evicting");
                if !self.free_evictable_locked(required).await {
                    let after = self.memory.available_mb().await;
                    return Err(ModelError::ResourceUnavailable {
                        role: role.clone(),
                        reason: format!("needs {required} MB, only {after} MB available after eviction"),
                    });
                }
            }
        }

        if inst.load().await {
            Ok(())
        } else {
            Err(ModelError::ResourceUnavailable {
                role: role.clone(),
                reason: format!("runtime failed to load {}", inst.identifier()),
            })
        }
    }

    /// LRU eviction over loaded evictable instances until `required_mb` is available.
    pub async fn free_evictable(&self, required_mb: u64) -> bool {
        let _guard = self.admission.lock().await;
        self.free_evictable_locked(required_mb).await
    }

    async fn free_evictable_locked(&self, required_mb: u64) -> bool {
        if self.memory.available_mb().await >= required_mb {
            return true;
        }

        let mut candidates: Vec<(Option<DateTime<Utc>>, &Role, &Arc<ModelInstance>)> = Vec::new();
        for (role, inst) in &self.evictable {
            if inst.is_loaded().await {
                candidates.push((inst.last_used_at().await, role, inst));
            }
        }
        // Never-used first, then oldest; role name breaks ties.
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        for (_, role, inst) in candidates {
            if inst.unload().await {
                info!(role=%role, "pool: evicted");
            }
            if self.memory.available_mb().await >= required_mb {
                return true;
            }
        }

        let available = self.memory.available_mb().await;
        warn!(required_mb, available, "pool: eviction could not free enough memory");
        available >= required_mb
    }

    pub async fn unload_model(&self, role: &Role) -> bool {
        let Some(inst) = self.evictable.get(role) else {
            warn!(role=%role, "pool: unload refused, role is pinned or unknown");
            return false;
        };
        let _guard = self.admission.lock().await;
        inst.unload().await
    }

    pub async fn available_memory(&self) -> u64 {
        self.memory.available_mb().await
    }

    pub async fn total_memory(&self) -> u64 {
        self.memory.total_mb().await
    }

    pub fn pinned_roles(&self) -> BTreeSet<Role> {
        self.pinned.keys().cloned().collect()
    }

    pub async fn loaded_roles(&self) -> BTreeSet<Role> {
        let mut out = BTreeSet::new();
        for (role, inst) in self.pinned.iter().chain(self.evictable.iter()) {
            if inst.is_loaded().await {
                out.insert(role.clone());
            }
        }
        out
    }

    pub async fn initialized_at(&self) -> Option<DateTime<Utc>> {
        *self.initialized_at.read().await
    }

    pub async fn health_check(&self) -> PoolHealth {
        let runtime_healthy = match self.runtime.health().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error=%e, "pool: runtime health probe failed");
                false
            }
        };

        let mut pinned_loaded = true;
        for inst in self.pinned.values() {
            pinned_loaded &= inst.is_loaded().await;
        }

        PoolHealth {
            runtime_healthy,
            initialized: self.initialized_at().await.is_some(),
            pinned_loaded,
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let mut instances = Vec::with_capacity(self.pinned.len() + self.evictable.len());
        for inst in self.pinned.values().chain(self.evictable.values()) {
            instances.push(inst.status().await);
        }

        PoolStatus {
            instances,
            pinned_roles: self.pinned_roles(),
            loaded_roles: self.loaded_roles().await,
            initialized_at: self.initialized_at().await,
            available_mb: self.available_memory().await,
            total_mb: self.total_memory().await,
        }
    }

    /// Release every loaded evictable instance. Pinned instances stay resident.
    pub async fn shutdown(&self) {
        let _guard = self.admission.lock().await;
        for (role, inst) in &self.evictable {
            if inst.is_loaded().await && inst.unload().await {
                info!(role=%role, "pool: released on shutdown");
            }
        }
    }
}
