use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TaskError;
use crate::types_tasks::{Task, TaskStatus};

/// Durable record of tasks. The orchestrator is the only writer of `status`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, text: &str) -> Result<Uuid, TaskError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, TaskError>;
    /// Rejects transitions the status machine does not allow.
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), TaskError>;
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, TaskError>;
}

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, text: &str) -> Result<Uuid, TaskError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            text: text.to_string(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        Ok(id)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, TaskError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        if !task.status.can_transition_to(status) {
            return Err(TaskError::Persistence(format!(
                "illegal transition {} -> {}",
                task.status.as_str(),
                status.as_str()
            )));
        }
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, TaskError> {
        let mut out: Vec<Task> = self.tasks.read().await.values().filter(|t| t.status == status).cloned().collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }
}
