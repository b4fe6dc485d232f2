mod common;

use common::*;
use modelops::{ResidencyState, Role};
use orchestrator::{ErrorKind, ExecutionBackend, OrchestratorSettings, OutcomeStatus, TaskStatus, TaskStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const CALL_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::test]
async fn test_lazy_load_then_complete() {
    let rt = Arc::new(FakeRuntime::default());
    let backend = Arc::new(in_process_backend(rt.clone(), CALL_TIMEOUT));
    let pool = backend.pool().clone();
    let (orch, store) = build_orchestrator(backend, OrchestratorSettings::default());

    assert!(pool.loaded_roles().await.is_empty());
    let id = orch.submit("Write a hello world function").await.unwrap();
    let out = orch.delegate(id).await;

    assert_eq!(out.status, OutcomeStatus::Completed);
    assert!(!out.result.unwrap().is_empty());
    assert_eq!(store.get_task(id).await.unwrap().unwrap().status, TaskStatus::Completed);

    assert_eq!(rt.load_count(EXEC_MODEL), 1);
    assert_eq!(rt.generate_count(FALLBACK_MODEL), 0);
    let exec = pool.instance(&Role::execution()).unwrap();
    assert_eq!(exec.residency().await, ResidencyState::Loaded);
    assert!(exec.last_used_at().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_execution_load_recovers_on_third_attempt() {
    let rt = Arc::new(FakeRuntime::default());
    rt.fail_next_loads(EXEC_MODEL, 2);
    rt.break_generate(FALLBACK_MODEL);
    let backend = Arc::new(in_process_backend(rt.clone(), CALL_TIMEOUT));
    let (orch, _) = build_orchestrator(backend, OrchestratorSettings::default());

    let id = orch.submit("t").await.unwrap();
    let out = orch.delegate(id).await;

    assert_eq!(out.status, OutcomeStatus::Completed);
    assert_eq!(out.retry_count, 2);
    assert_eq!(out.attempts, 3);
    assert_eq!(rt.load_count(EXEC_MODEL), 3);
    assert_eq!(rt.generate_count(FALLBACK_MODEL), 2);
    assert!(out.result.unwrap().starts_with(EXEC_MODEL));
}

#[tokio::test]
async fn test_fallback_engages_once_when_pool_path_raises() {
    let rt = Arc::new(FakeRuntime::default());
    rt.break_load(EXEC_MODEL);
    let backend = in_process_backend(rt.clone(), CALL_TIMEOUT);

    let out = backend.execute(Uuid::new_v4(), "hello").await.unwrap();
    assert_eq!(out, format!("{FALLBACK_MODEL}: hello"));
    assert_eq!(rt.generate_count(FALLBACK_MODEL), 1);
    assert_eq!(rt.generate_count(EXEC_MODEL), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_failure_becomes_outcome() {
    let rt = Arc::new(FakeRuntime::default());
    rt.break_generate(EXEC_MODEL);
    rt.break_generate(FALLBACK_MODEL);
    let backend = Arc::new(in_process_backend(rt.clone(), CALL_TIMEOUT));
    let (orch, _) = build_orchestrator(backend, OrchestratorSettings::default());

    let id = orch.submit("t").await.unwrap();
    let out = orch.delegate(id).await;

    assert_eq!(out.status, OutcomeStatus::Failed);
    assert_eq!(out.error_kind, Some(ErrorKind::ModelExecution));
    assert!(out.error.unwrap().contains("fallback-model"));
    // Once per attempt, never more.
    assert_eq!(rt.generate_count(EXEC_MODEL), 3);
    assert_eq!(rt.generate_count(FALLBACK_MODEL), 3);
}

#[tokio::test(start_paused = true)]
async fn test_pool_timeout_falls_back() {
    let rt = Arc::new(FakeRuntime::default());
    rt.slow_generate(EXEC_MODEL, Duration::from_secs(600));
    let backend = in_process_backend(rt.clone(), Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let out = backend.execute(Uuid::new_v4(), "slow").await.unwrap();
    assert!(out.starts_with(FALLBACK_MODEL));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_hung_load_falls_back_and_releases_admission() {
    let rt = Arc::new(FakeRuntime::default());
    rt.slow_load(EXEC_MODEL, Duration::from_secs(3600));
    let backend = in_process_backend(rt.clone(), Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let out = tokio::time::timeout(Duration::from_secs(60), backend.execute(Uuid::new_v4(), "hang"))
        .await
        .expect("hung load must not block the call")
        .unwrap();
    assert!(out.starts_with(FALLBACK_MODEL));
    assert!(started.elapsed() < Duration::from_secs(11));
    assert_eq!(rt.generate_count(EXEC_MODEL), 0);

    let exec = backend.pool().instance(&Role::execution()).unwrap();
    assert!(!exec.is_loaded().await);

    // The abandoned load gave the admission lock back.
    let freed = tokio::time::timeout(Duration::from_secs(1), backend.pool().free_evictable(0)).await;
    assert_eq!(freed.ok(), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_timeout_is_task_timeout() {
    let rt = Arc::new(FakeRuntime::default());
    rt.break_load(EXEC_MODEL);
    rt.slow_generate(FALLBACK_MODEL, Duration::from_secs(600));
    let backend = in_process_backend(rt, Duration::from_secs(5));

    let err = backend.execute(Uuid::new_v4(), "slow").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TaskTimeout);
}

#[tokio::test]
async fn test_describe_reports_pool() {
    let rt = Arc::new(FakeRuntime::default());
    let backend = in_process_backend(rt, CALL_TIMEOUT);

    // Not initialized yet: unhealthy.
    let before = backend.describe().await;
    assert_eq!(before.kind, "in_process");
    assert!(!before.healthy);

    assert!(backend.pool().initialize().await);
    let after = backend.describe().await;
    assert!(after.healthy);
    assert_eq!(after.detail["fallback_model"], FALLBACK_MODEL);
    assert_eq!(after.detail["pool"]["loaded_roles"][0], Role::CONVERSATION);
}
