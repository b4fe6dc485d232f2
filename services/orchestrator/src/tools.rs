//! Dispatch tool registries for the orchestrator and executor services.

use dispatch::{DispatchError, ToolDescriptor, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::ExecutionBackend;
use crate::error::{RemoteTaskError, TaskError};
use crate::orchestrator_task::TaskOrchestrator;

pub const TOOL_SUBMIT_TASK: &str = "submit_task";
pub const TOOL_DELEGATE_TASK: &str = "delegate_task";
pub const TOOL_GET_TASK: &str = "get_task";
pub const TOOL_LIST_ACTIVE_TASKS: &str = "list_active_tasks";
pub const TOOL_EXECUTE_TASK: &str = "execute_task";
pub const TOOL_MODEL_STATUS: &str = "model_status";

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, DispatchError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::InvalidParams(format!("{key} is required")))
}

fn arg_uuid(args: &Value, key: &str) -> Result<Uuid, DispatchError> {
    arg_str(args, key)?
        .parse()
        .map_err(|e| DispatchError::InvalidParams(format!("{key}: {e}")))
}

// The error kind rides along in the fault so the caller can rebuild it.
fn to_dispatch(e: TaskError) -> DispatchError {
    match e {
        TaskError::Validation(m) => DispatchError::InvalidParams(m),
        other => DispatchError::ToolDetail {
            message: other.to_string(),
            data: serde_json::to_value(RemoteTaskError::from(&other)).unwrap_or_default(),
        },
    }
}

fn to_value<T: serde::Serialize>(v: T) -> Result<Value, DispatchError> {
    serde_json::to_value(v).map_err(|e| DispatchError::Tool(e.to_string()))
}

fn schema(required: &[&str]) -> Value {
    let props: serde_json::Map<String, Value> =
        required.iter().map(|k| (k.to_string(), json!({ "type": "string" }))).collect();
    json!({ "type": "object", "properties": props, "required": required })
}

pub fn orchestrator_tools(orchestrator: Arc<TaskOrchestrator>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();

    let orch = orchestrator.clone();
    reg.register_fn(
        ToolDescriptor::new(TOOL_SUBMIT_TASK, "Create a pending task from natural-language text", schema(&["text"])),
        move |args: Value| {
            let orch = orch.clone();
            async move {
                let id = orch.submit(arg_str(&args, "text")?).await.map_err(to_dispatch)?;
                Ok::<_, DispatchError>(json!({ "task_id": id, "status": "pending" }))
            }
        },
    );

    let orch = orchestrator.clone();
    reg.register_fn(
        ToolDescriptor::new(TOOL_DELEGATE_TASK, "Run a pending task to completion or failure", schema(&["task_id"])),
        move |args: Value| {
            let orch = orch.clone();
            async move {
                let id = arg_uuid(&args, "task_id")?;
                to_value(orch.delegate(id).await)
            }
        },
    );

    let orch = orchestrator.clone();
    reg.register_fn(
        ToolDescriptor::new(TOOL_GET_TASK, "Fetch a task record and its final outcome", schema(&["task_id"])),
        move |args: Value| {
            let orch = orch.clone();
            async move {
                let id = arg_uuid(&args, "task_id")?;
                let task = orch
                    .get_task(id)
                    .await
                    .map_err(to_dispatch)?
                    .ok_or_else(|| to_dispatch(TaskError::NotFound(id)))?;
                Ok::<_, DispatchError>(json!({ "task": task, "outcome": orch.get_outcome(id).await }))
            }
        },
    );

    let orch = orchestrator;
    reg.register_fn(
        ToolDescriptor::new(TOOL_LIST_ACTIVE_TASKS, "List tasks currently executing", json!({ "type": "object" })),
        move |_args: Value| {
            let orch = orch.clone();
            async move { to_value(orch.get_active_tasks().await) }
        },
    );

    reg
}

pub fn executor_tools(backend: Arc<dyn ExecutionBackend>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();

    let b = backend.clone();
    reg.register_fn(
        ToolDescriptor::new(TOOL_EXECUTE_TASK, "Run task text once on the execution model", schema(&["task_id", "text"])),
        move |args: Value| {
            let b = b.clone();
            async move {
                let id = arg_uuid(&args, "task_id")?;
                let result = b.execute(id, arg_str(&args, "text")?).await.map_err(to_dispatch)?;
                Ok::<_, DispatchError>(json!({ "result": result }))
            }
        },
    );

    let b = backend;
    reg.register_fn(
        ToolDescriptor::new(TOOL_MODEL_STATUS, "Report model pool residency and health", json!({ "type": "object" })),
        move |_args: Value| {
            let b = b.clone();
            async move { to_value(b.describe().await) }
        },
    );

    reg
}
