use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorKind, TaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// pending -> running -> {completed | failed}. Terminal states absorb.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub text: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Orchestrator-owned, never persisted. Lives from pickup until a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTaskRecord {
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Attempts started so far, including one still in flight.
    pub attempts: u32,
    /// Attempts that failed and were followed by another.
    pub retry_count: u32,
    pub timeout_deadline: DateTime<Utc>,
}

impl ActiveTaskRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.timeout_deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    NotFound,
    /// Delegation refused because the task is not pending.
    Rejected,
}

/// What every delegation returns, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub retry_count: u32,
}

impl TaskOutcome {
    pub fn completed(task_id: Uuid, result: String, attempts: u32, retry_count: u32) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Completed,
            message: format!("task completed after {attempts} attempt(s)"),
            result: Some(result),
            error: None,
            error_kind: None,
            attempts,
            retry_count,
        }
    }

    pub fn failed(task_id: Uuid, message: String, error: &TaskError, attempts: u32, retry_count: u32) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Failed,
            message,
            result: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            attempts,
            retry_count,
        }
    }

    pub fn not_found(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::NotFound,
            message: format!("task {task_id} not found"),
            result: None,
            error: None,
            error_kind: Some(ErrorKind::NotFound),
            attempts: 0,
            retry_count: 0,
        }
    }

    pub fn rejected(task_id: Uuid, current: TaskStatus) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Rejected,
            message: format!("task is {}, only pending tasks can be delegated", current.as_str()),
            result: None,
            error: None,
            error_kind: None,
            attempts: 0,
            retry_count: 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::TaskTimeout)
    }
}
