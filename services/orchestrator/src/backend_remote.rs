use async_trait::async_trait;
use dispatch::DispatchClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{BackendStatus, ExecutionBackend};
use crate::error::TaskError;
use crate::supervisor::ServiceSupervisor;
use crate::tools::TOOL_EXECUTE_TASK;

/// Slack on top of the executor's own worst case for serialization and the hop.
pub const TRANSPORT_MARGIN: Duration = Duration::from_secs(5);

/// How long to wait for one `execute_task` reply. The executor may spend one
/// per-call timeout on the pool path and another on the fallback, and it
/// reports its own timeouts as `TaskTimeout`. Giving up earlier would turn a
/// still-running attempt into a retryable transport error.
pub fn remote_call_budget(executor_call_timeout: Duration) -> Duration {
    executor_call_timeout.saturating_mul(2).saturating_add(TRANSPORT_MARGIN)
}

/// Runs tasks in the supervised executor process over the dispatch transport.
pub struct RemoteBackend {
    supervisor: Arc<ServiceSupervisor>,
    http: reqwest::Client,
    call_budget: Duration,
}

impl RemoteBackend {
    /// `executor_call_timeout` is the per-call timeout the executor runs with.
    pub fn new(supervisor: Arc<ServiceSupervisor>, executor_call_timeout: Duration) -> Self {
        Self {
            supervisor,
            http: reqwest::Client::new(),
            call_budget: remote_call_budget(executor_call_timeout),
        }
    }

    pub fn call_budget(&self) -> Duration {
        self.call_budget
    }

    // The handle is re-read on every call: a restart replaces it.
    async fn client(&self) -> Result<DispatchClient, TaskError> {
        let handle = self
            .supervisor
            .handle()
            .await
            .ok_or_else(|| TaskError::BackendUnreachable("executor is not running".to_string()))?;
        Ok(DispatchClient::with_client(handle.base_url, self.http.clone(), self.call_budget))
    }
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    async fn execute(&self, task_id: Uuid, text: &str) -> Result<String, TaskError> {
        let client = self.client().await?;
        debug!(task_id=%task_id, executor=%client.base_url(), "backend: dispatching to executor");

        let out = client.call_tool(TOOL_EXECUTE_TASK, json!({ "task_id": task_id, "text": text })).await?;
        out.get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaskError::ModelExecution("executor returned no result".to_string()))
    }

    async fn describe(&self) -> BackendStatus {
        let supervisor = self.supervisor.health().await;
        let reachable = match self.client().await {
            Ok(c) => c.health().await,
            Err(_) => false,
        };
        BackendStatus {
            kind: "supervised".to_string(),
            healthy: supervisor.running && reachable,
            detail: json!({ "supervisor": supervisor, "reachable": reachable }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::{BackendSpec, RestartPolicy};
    use crate::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // A placeholder child keeps the supervisor "running" while wiremock plays the executor.
    async fn supervised(port: u16) -> Arc<ServiceSupervisor> {
        let mut spec = BackendSpec::new("sleep", port);
        spec.args = vec!["30".to_string()];
        spec.startup_grace = Duration::ZERO;
        let sup = Arc::new(ServiceSupervisor::new(spec, RestartPolicy::default()));
        sup.start().await.unwrap();
        sup
    }

    #[tokio::test]
    async fn test_execute_through_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dispatch"))
            .and(body_partial_json(json!({"method": "tools/call", "params": {"name": "execute_task"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"result": "fn main() {}"}})))
            .mount(&server)
            .await;

        let sup = supervised(server.address().port()).await;
        let backend = RemoteBackend::new(sup.clone(), Duration::from_secs(5));
        let out = backend.execute(Uuid::new_v4(), "write main").await.unwrap();
        assert_eq!(out, "fn main() {}");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_tool_error_is_model_execution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dispatch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"kind": "tool_error", "code": -32000, "message": "model crashed"}
            })))
            .mount(&server)
            .await;

        let sup = supervised(server.address().port()).await;
        let backend = RemoteBackend::new(sup.clone(), Duration::from_secs(5));
        let err = backend.execute(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelExecution);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_timeout_stays_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dispatch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {
                    "kind": "tool_error",
                    "code": -32000,
                    "message": "task timed out: fallback did not answer",
                    "data": {"kind": "task_timeout", "detail": "fallback did not answer"}
                }
            })))
            .mount(&server)
            .await;

        let sup = supervised(server.address().port()).await;
        let backend = RemoteBackend::new(sup.clone(), Duration::from_secs(5));
        let err = backend.execute(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskTimeout);
        assert_eq!(err.to_string(), "task timed out: fallback did not answer");
        sup.shutdown().await;
    }

    #[test]
    fn test_call_budget_covers_pool_and_fallback() {
        let per_call = Duration::from_secs(300);
        assert_eq!(remote_call_budget(per_call), Duration::from_secs(605));
        assert_eq!(remote_call_budget(Duration::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn test_slow_executor_reply_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dispatch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"result": "late but fine"}}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        // Longer than one executor call timeout, shorter than pool + fallback.
        let sup = supervised(server.address().port()).await;
        let backend = RemoteBackend::new(sup.clone(), Duration::from_millis(200));
        let out = backend.execute(Uuid::new_v4(), "x").await.unwrap();
        assert_eq!(out, "late but fine");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_executor_is_unreachable() {
        let sup = supervised(1).await;
        sup.shutdown().await;

        let backend = RemoteBackend::new(sup, Duration::from_secs(1));
        let err = backend.execute(Uuid::new_v4(), "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
        assert!(!backend.describe().await.healthy);
    }
}
