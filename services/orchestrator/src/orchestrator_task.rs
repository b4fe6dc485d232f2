//! Task lifecycle: pickup, bounded retry, deadline enforcement, terminal commit.
//!
//! A task is "active" while it has an entry in the active map. Removing that
//! entry is the commit point for its terminal status: whoever removes it (the
//! delegating call or the monitor sweep) writes the terminal status, and the
//! other side backs off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendStatus, ExecutionBackend};
use crate::error::{ErrorKind, TaskError};
use crate::task_store::TaskStore;
use crate::types_tasks::{ActiveTaskRecord, OutcomeStatus, Task, TaskOutcome, TaskStatus};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub task_timeout: Duration,
    pub max_task_chars: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            task_timeout: Duration::from_secs(300),
            max_task_chars: 10_000,
        }
    }
}

/// Result of the retry loop, before it is committed.
#[derive(Debug)]
pub enum Execution {
    Succeeded { result: String, attempts: u32 },
    Failed { error: TaskError, attempts: u32 },
    TimedOut { error: TaskError, attempts: u32 },
}

enum Gate {
    Open,
    Expired(DateTime<Utc>),
    Gone,
}

impl Execution {
    pub fn attempts(&self) -> u32 {
        match self {
            Execution::Succeeded { attempts, .. }
            | Execution::Failed { attempts, .. }
            | Execution::TimedOut { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub active_tasks: usize,
    pub active: Vec<ActiveTaskRecord>,
    pub completed: usize,
    pub failed: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub task_timeout_secs: u64,
    pub backend: BackendStatus,
}

pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    backend: Arc<dyn ExecutionBackend>,
    settings: OrchestratorSettings,
    active: RwLock<HashMap<Uuid, ActiveTaskRecord>>,
    outcomes: RwLock<HashMap<Uuid, TaskOutcome>>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn TaskStore>, backend: Arc<dyn ExecutionBackend>, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            backend,
            settings,
            active: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn submit(&self, text: &str) -> Result<Uuid, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::Validation("task text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.settings.max_task_chars {
            return Err(TaskError::Validation(format!(
                "task text is {chars} characters, limit is {}",
                self.settings.max_task_chars
            )));
        }

        let id = self.store.create_task(text).await?;
        info!(task_id=%id, chars, "orchestrator: task submitted");
        Ok(id)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, TaskError> {
        self.store.get_task(task_id).await
    }

    /// Run a pending task to a terminal state with the default deadline.
    pub async fn delegate(&self, task_id: Uuid) -> TaskOutcome {
        let timeout = chrono::Duration::from_std(self.settings.task_timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        self.delegate_until(task_id, Utc::now() + timeout).await
    }

    pub async fn delegate_until(&self, task_id: Uuid, deadline: DateTime<Utc>) -> TaskOutcome {
        // 1) Look up
        let task = match self.store.get_task(task_id).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                warn!(task_id=%task_id, "orchestrator: delegate on unknown task");
                return TaskOutcome::not_found(task_id);
            }
            Err(e) => {
                error!(task_id=%task_id, error=%e, "orchestrator: task lookup failed");
                return TaskOutcome::failed(task_id, "task store unavailable".to_string(), &e, 0, 0);
            }
        };
        if task.status != TaskStatus::Pending {
            return TaskOutcome::rejected(task_id, task.status);
        }

        // 2) Claim. The active entry is the claim; a second delegate loses here.
        {
            let mut active = self.active.write().await;
            if active.contains_key(&task_id) {
                return TaskOutcome::rejected(task_id, TaskStatus::Running);
            }
            active.insert(
                task_id,
                ActiveTaskRecord {
                    task_id,
                    started_at: Utc::now(),
                    attempts: 0,
                    retry_count: 0,
                    timeout_deadline: deadline,
                },
            );
        }
        if let Err(e) = self.store.update_status(task_id, TaskStatus::Running).await {
            self.active.write().await.remove(&task_id);
            if let Ok(Some(t)) = self.store.get_task(task_id).await {
                if t.status != TaskStatus::Pending {
                    return TaskOutcome::rejected(task_id, t.status);
                }
            }
            error!(task_id=%task_id, error=%e, "orchestrator: could not mark task running");
            return TaskOutcome::failed(task_id, "could not mark task running".to_string(), &e, 0, 0);
        }
        info!(task_id=%task_id, deadline=%deadline, "orchestrator: task running");

        // 3) Execute
        let execution = self.execute_with_retry(task_id, &task.text).await;

        // 4) Commit
        self.finish(task_id, execution).await
    }

    // Deadline check and attempt count in one step, so a sweep landing
    // mid-attempt records the attempt in flight.
    async fn begin_attempt(&self, task_id: Uuid, attempt: u32) -> Gate {
        let now = Utc::now();
        let mut active = self.active.write().await;
        match active.get_mut(&task_id) {
            Some(r) if now <= r.timeout_deadline => {
                r.attempts = attempt;
                Gate::Open
            }
            Some(r) => Gate::Expired(r.timeout_deadline),
            None => Gate::Gone,
        }
    }

    /// Bounded retry against the task's active record. A missing record means
    /// the monitor already failed the task, which reads as a timeout.
    pub async fn execute_with_retry(&self, task_id: Uuid, text: &str) -> Execution {
        let max = self.settings.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max {
            match self.begin_attempt(task_id, attempt).await {
                Gate::Open => {}
                Gate::Expired(d) => {
                    warn!(task_id=%task_id, attempt, deadline=%d, "orchestrator: deadline passed, not retrying");
                    return Execution::TimedOut {
                        error: TaskError::TaskTimeout(format!("deadline {d} passed before attempt {attempt}")),
                        attempts: attempt - 1,
                    };
                }
                Gate::Gone => {
                    warn!(task_id=%task_id, attempt, "orchestrator: task no longer active, not retrying");
                    return Execution::TimedOut {
                        error: TaskError::TaskTimeout("task was failed by the monitor".to_string()),
                        attempts: attempt - 1,
                    };
                }
            }

            match self.backend.execute(task_id, text).await {
                Ok(result) => {
                    info!(task_id=%task_id, attempt, "orchestrator: attempt succeeded");
                    return Execution::Succeeded { result, attempts: attempt };
                }
                Err(e) if e.kind() == ErrorKind::TaskTimeout => {
                    warn!(task_id=%task_id, attempt, error=%e, "orchestrator: attempt timed out");
                    return Execution::TimedOut { error: e, attempts: attempt };
                }
                Err(e) => {
                    warn!(task_id=%task_id, attempt, max, error=%e, "orchestrator: attempt failed");
                    if let Some(r) = self.active.write().await.get_mut(&task_id) {
                        r.retry_count += 1;
                    }
                    last_error = Some(e);
                    if attempt < max {
                        sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        Execution::Failed {
            error: last_error.unwrap_or_else(|| TaskError::ModelExecution("no attempt was made".to_string())),
            attempts: max,
        }
    }

    async fn finish(&self, task_id: Uuid, execution: Execution) -> TaskOutcome {
        let Some(record) = self.active.write().await.remove(&task_id) else {
            // Swept by the monitor; its timeout outcome stands.
            warn!(task_id=%task_id, attempts = execution.attempts(), "orchestrator: result arrived after task was failed");
            if let Some(out) = self.get_outcome(task_id).await {
                return out;
            }
            let err = TaskError::TaskTimeout("task was failed by the monitor".to_string());
            return TaskOutcome::failed(task_id, "task exceeded its deadline".to_string(), &err, execution.attempts(), 0);
        };

        let retry_count = record.retry_count;
        let (status, outcome) = match execution {
            Execution::Succeeded { result, attempts } => {
                (TaskStatus::Completed, TaskOutcome::completed(task_id, result, attempts, retry_count))
            }
            Execution::Failed { error, attempts } => (
                TaskStatus::Failed,
                TaskOutcome::failed(task_id, format!("task failed after {attempts} attempt(s)"), &error, attempts, retry_count),
            ),
            Execution::TimedOut { error, attempts } => (
                TaskStatus::Failed,
                TaskOutcome::failed(task_id, "task exceeded its deadline".to_string(), &error, attempts, retry_count),
            ),
        };

        if let Err(e) = self.store.update_status(task_id, status).await {
            error!(task_id=%task_id, status=%status.as_str(), error=%e, "orchestrator: failed to persist terminal status");
        }
        self.outcomes.write().await.insert(task_id, outcome.clone());

        info!(task_id=%task_id, status=%status.as_str(), attempts = outcome.attempts, retry_count, "orchestrator: task finished");
        outcome
    }

    /// Fail and drop every active task whose deadline is before `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<ActiveTaskRecord> = {
            let mut active = self.active.write().await;
            let ids: Vec<Uuid> = active.values().filter(|r| r.is_expired(now)).map(|r| r.task_id).collect();
            let removed: Vec<ActiveTaskRecord> = ids.iter().filter_map(|id| active.remove(id)).collect();

            let mut outcomes = self.outcomes.write().await;
            for r in &removed {
                let err = TaskError::TaskTimeout(format!("deadline {} passed", r.timeout_deadline));
                outcomes.insert(
                    r.task_id,
                    TaskOutcome::failed(r.task_id, "task exceeded its deadline".to_string(), &err, r.attempts, r.retry_count),
                );
            }
            removed
        };

        for r in &expired {
            warn!(task_id=%r.task_id, deadline=%r.timeout_deadline, "monitor_loop: task exceeded deadline, failing");
            if let Err(e) = self.store.update_status(r.task_id, TaskStatus::Failed).await {
                error!(task_id=%r.task_id, error=%e, "monitor_loop: failed to persist timeout");
            }
        }
        expired.into_iter().map(|r| r.task_id).collect()
    }

    /// Fail tasks left `running` by a previous process. Nothing here is executing them.
    pub async fn recover_orphans(&self) -> Result<usize, TaskError> {
        let running = self.store.list_by_status(TaskStatus::Running).await?;
        let orphans: Vec<Uuid> = {
            let active = self.active.read().await;
            running.into_iter().map(|t| t.id).filter(|id| !active.contains_key(id)).collect()
        };

        for id in &orphans {
            warn!(task_id=%id, "orchestrator: failing task orphaned by restart");
            self.store.update_status(*id, TaskStatus::Failed).await?;
        }
        Ok(orphans.len())
    }

    pub async fn get_active_tasks(&self) -> Vec<ActiveTaskRecord> {
        let mut out: Vec<ActiveTaskRecord> = self.active.read().await.values().cloned().collect();
        out.sort_by_key(|r| r.started_at);
        out
    }

    pub async fn get_outcome(&self, task_id: Uuid) -> Option<TaskOutcome> {
        self.outcomes.read().await.get(&task_id).cloned()
    }

    pub async fn get_server_status(&self) -> ServerStatus {
        let active = self.get_active_tasks().await;
        let (completed, failed) = {
            let outcomes = self.outcomes.read().await;
            let completed = outcomes.values().filter(|o| o.status == OutcomeStatus::Completed).count();
            (completed, outcomes.len() - completed)
        };

        ServerStatus {
            active_tasks: active.len(),
            active,
            completed,
            failed,
            max_retries: self.settings.max_retries,
            retry_delay_ms: self.settings.retry_delay.as_millis() as u64,
            task_timeout_secs: self.settings.task_timeout.as_secs(),
            backend: self.backend.describe().await,
        }
    }
}
