use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{api_error, ApiError, TaskError};
use crate::state::SharedState;
use crate::types_tasks::{ActiveTaskRecord, OutcomeStatus, Task, TaskOutcome, TaskStatus};

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub text: String,
}

#[derive(Serialize, Deserialize)]
pub struct TaskCreatedResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Serialize, Deserialize)]
pub struct TaskView {
    pub task: Task,
    pub active: Option<ActiveTaskRecord>,
    pub outcome: Option<TaskOutcome>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskCreatedResponse>)> {
    let task_id = state.orchestrator.submit(&req.text).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(TaskCreatedResponse { task_id, status: TaskStatus::Pending })))
}

pub async fn get_task(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ApiResult<Json<TaskView>> {
    let orch = &state.orchestrator;
    let task = orch
        .get_task(id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(TaskError::NotFound(id)))?;

    let active = orch.get_active_tasks().await.into_iter().find(|r| r.task_id == id);
    Ok(Json(TaskView { task, active, outcome: orch.get_outcome(id).await }))
}

/// Blocks until the task reaches a terminal state.
pub async fn delegate_task(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<TaskOutcome>) {
    let outcome = state.orchestrator.delegate(id).await;
    let code = match outcome.status {
        OutcomeStatus::Completed | OutcomeStatus::Failed => StatusCode::OK,
        OutcomeStatus::NotFound => StatusCode::NOT_FOUND,
        OutcomeStatus::Rejected => StatusCode::CONFLICT,
    };
    (code, Json(outcome))
}

pub async fn list_active(State(state): State<SharedState>) -> Json<Vec<ActiveTaskRecord>> {
    Json(state.orchestrator.get_active_tasks().await)
}
