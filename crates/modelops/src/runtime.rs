use async_trait::async_trait;

use crate::{ChatTurn, RuntimeError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeInfo {
    pub name: String,
    pub base_url: String,
}

/// Network-accessible inference runtime that serves models by identifier.
///
/// There is deliberately no unload call: runtimes of this kind evict on their
/// own schedule, so unloading is pure bookkeeping on our side.
#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Materialize `model` in the runtime.
    async fn load(&self, model: &str) -> Result<(), RuntimeError>;
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, RuntimeError>;
    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String, RuntimeError>;
    async fn health(&self) -> Result<(), RuntimeError>;
    fn info(&self) -> RuntimeInfo;
}
