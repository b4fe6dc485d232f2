use axum::{http::StatusCode, Json};
use dispatch::DispatchError;
use modelops::ModelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Tag callers branch on instead of matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceUnavailable,
    ModelExecution,
    TaskTimeout,
    BackendUnreachable,
    Validation,
    Persistence,
    NotFound,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("model execution failed: {0}")]
    ModelExecution(String),

    #[error("task timed out: {0}")]
    TaskTimeout(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("invalid task: {0}")]
    Validation(String),

    #[error("task store: {0}")]
    Persistence(String),

    #[error("task {0} not found")]
    NotFound(Uuid),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            TaskError::ModelExecution(_) => ErrorKind::ModelExecution,
            TaskError::TaskTimeout(_) => ErrorKind::TaskTimeout,
            TaskError::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            TaskError::Validation(_) => ErrorKind::Validation,
            TaskError::Persistence(_) => ErrorKind::Persistence,
            TaskError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Message without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            TaskError::ResourceUnavailable(m)
            | TaskError::ModelExecution(m)
            | TaskError::TaskTimeout(m)
            | TaskError::BackendUnreachable(m)
            | TaskError::Validation(m)
            | TaskError::Persistence(m) => m.clone(),
            TaskError::NotFound(id) => id.to_string(),
        }
    }

    /// Rebuild an error reported by another process. `NotFound` only
    /// survives when the detail is still a task id.
    pub fn from_kind(kind: ErrorKind, detail: String) -> Self {
        match kind {
            ErrorKind::ResourceUnavailable => TaskError::ResourceUnavailable(detail),
            ErrorKind::ModelExecution => TaskError::ModelExecution(detail),
            ErrorKind::TaskTimeout => TaskError::TaskTimeout(detail),
            ErrorKind::BackendUnreachable => TaskError::BackendUnreachable(detail),
            ErrorKind::Validation => TaskError::Validation(detail),
            ErrorKind::Persistence => TaskError::Persistence(detail),
            ErrorKind::NotFound => match detail.parse() {
                Ok(id) => TaskError::NotFound(id),
                Err(_) => TaskError::ModelExecution(detail),
            },
        }
    }
}

/// Wire form of a [`TaskError`] carried in a dispatch fault's `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTaskError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&TaskError> for RemoteTaskError {
    fn from(e: &TaskError) -> Self {
        Self { kind: e.kind(), detail: e.detail() }
    }
}

/// Body of every non-2xx HTTP response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
}

pub fn api_error(e: TaskError) -> (StatusCode, Json<ApiError>) {
    let status = match e.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::BackendUnreachable | ErrorKind::ResourceUnavailable | ErrorKind::Persistence => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::TaskTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ModelExecution => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ApiError { error: e.to_string(), kind: e.kind() }))
}

impl From<ModelError> for TaskError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Execution { .. } => TaskError::ModelExecution(e.to_string()),
            ModelError::ResourceUnavailable { .. } | ModelError::Residency(_) | ModelError::UnknownRole(_) => {
                TaskError::ResourceUnavailable(e.to_string())
            }
        }
    }
}

impl From<DispatchError> for TaskError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Transport(m) => TaskError::BackendUnreachable(m),
            DispatchError::ToolDetail { message, data } => match serde_json::from_value::<RemoteTaskError>(data) {
                Ok(remote) => TaskError::from_kind(remote.kind, remote.detail),
                Err(_) => TaskError::ModelExecution(message),
            },
            other => TaskError::ModelExecution(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(e: sqlx::Error) -> Self {
        TaskError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops::{Role, RuntimeError};

    #[test]
    fn test_model_errors_map_to_kinds() {
        let e: TaskError = ModelError::ResourceUnavailable { role: Role::execution(), reason: "full".into() }.into();
        assert_eq!(e.kind(), ErrorKind::ResourceUnavailable);

        let e: TaskError = ModelError::Execution {
            role: Role::execution(),
            source: RuntimeError::Other("boom".into()),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::ModelExecution);
        assert!(e.to_string().contains("execution-model"));
    }

    #[test]
    fn test_dispatch_errors_map_to_kinds() {
        let e: TaskError = DispatchError::Transport("connection refused".into()).into();
        assert_eq!(e.kind(), ErrorKind::BackendUnreachable);

        let e: TaskError = DispatchError::Tool("model crashed".into()).into();
        assert_eq!(e.kind(), ErrorKind::ModelExecution);
    }

    #[test]
    fn test_remote_error_keeps_kind_and_detail() {
        for original in [
            TaskError::TaskTimeout("fallback fallback-m did not answer within 5s".into()),
            TaskError::ResourceUnavailable("needs 3000 MB".into()),
            TaskError::ModelExecution("model crashed".into()),
            TaskError::NotFound(Uuid::new_v4()),
        ] {
            let data = serde_json::to_value(RemoteTaskError::from(&original)).unwrap();
            let rebuilt: TaskError = DispatchError::ToolDetail { message: original.to_string(), data }.into();
            assert_eq!(rebuilt.kind(), original.kind());
            assert_eq!(rebuilt.to_string(), original.to_string());
        }
    }

    #[test]
    fn test_unrecognized_tool_detail_is_model_execution() {
        let e: TaskError = DispatchError::ToolDetail {
            message: "odd".into(),
            data: serde_json::json!({"kind": "cosmic_rays"}),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::ModelExecution);
        assert_eq!(e.detail(), "odd");
    }
}
