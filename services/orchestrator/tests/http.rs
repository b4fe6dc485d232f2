mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use dispatch::{DispatchRequest, DispatchResponse, FaultKind};
use orchestrator::{executor_app, orchestrator_app, AppState, ExecutionBackend, TaskOutcome};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(script: Vec<Result<String, orchestrator::TaskError>>) -> Router {
    let (orch, _) = build_orchestrator(Arc::new(ScriptedBackend::new(script)), fast_settings());
    orchestrator_app(Arc::new(AppState::new(orch, None)))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_task_lifecycle_over_http() {
    let app = app(vec![Ok("print('hi')".into())]);

    let (status, body) = send(&app, post_json("/tasks", json!({"text": "Write a hello world function"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, post_json(&format!("/tasks/{id}/delegate"), Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: TaskOutcome = serde_json::from_value(body).unwrap();
    assert_eq!(outcome.result.as_deref(), Some("print('hi')"));

    let (status, body) = send(&app, get(&format!("/tasks/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "completed");
    assert_eq!(body["outcome"]["status"], "completed");
    assert!(body["active"].is_null());

    let (status, _) = send(&app, post_json(&format!("/tasks/{id}/delegate"), Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_http_errors_carry_kind() {
    let app = app(vec![]);

    let (status, body) = send(&app, post_json("/tasks", json!({"text": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let missing = uuid::Uuid::new_v4();
    let (status, body) = send(&app, get(&format!("/tasks/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, body) = send(&app, post_json(&format!("/tasks/{missing}/delegate"), Value::Null)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");
}

#[tokio::test]
async fn test_health_status_and_active() {
    let app = app(vec![]);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"]["kind"], "scripted");

    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"]["active_tasks"], 0);

    let (status, body) = send(&app, get("/tasks/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_dispatch_submit_and_delegate() {
    let app = app(vec![Ok("42".into())]);

    let req = DispatchRequest::call_tool("submit_task", json!({"text": "compute the answer"}));
    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(req).unwrap())).await;
    let resp: DispatchResponse = serde_json::from_value(body).unwrap();
    let id = resp.result.unwrap()["task_id"].as_str().unwrap().to_string();

    let req = DispatchRequest::call_tool("delegate_task", json!({"task_id": id}));
    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(req).unwrap())).await;
    let resp: DispatchResponse = serde_json::from_value(body).unwrap();
    assert_eq!(resp.result.unwrap()["result"], "42");

    let req = DispatchRequest::call_tool("get_task", json!({"task_id": "not-a-uuid"}));
    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(req).unwrap())).await;
    let resp: DispatchResponse = serde_json::from_value(body).unwrap();
    assert_eq!(resp.error.unwrap().kind, FaultKind::InvalidParams);

    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(DispatchRequest::list_tools()).unwrap())).await;
    let names: Vec<String> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["delegate_task", "get_task", "list_active_tasks", "submit_task"]);
}

#[tokio::test]
async fn test_executor_serves_execute_task() {
    let rt = Arc::new(FakeRuntime::default());
    let backend: Arc<dyn ExecutionBackend> = Arc::new(in_process_backend(rt.clone(), Duration::from_secs(30)));
    let app = executor_app(backend);

    let req = DispatchRequest::call_tool("execute_task", json!({"task_id": uuid::Uuid::new_v4(), "text": "hi"}));
    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(req).unwrap())).await;
    assert_eq!(body["result"]["result"], format!("{EXEC_MODEL}: hi"));
    assert_eq!(rt.load_count(EXEC_MODEL), 1);

    let req = DispatchRequest::call_tool("model_status", json!({}));
    let (_, body) = send(&app, post_json("/dispatch", serde_json::to_value(req).unwrap())).await;
    assert_eq!(body["result"]["kind"], "in_process");

    // Pool never initialized, so the executor reports degraded.
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}
