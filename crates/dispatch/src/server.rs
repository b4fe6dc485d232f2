use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::protocol::{
    DispatchRequest, DispatchResponse, ToolCallParams, ToolDescriptor, ToolList, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::DispatchError;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, DispatchError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<Value, DispatchError> {
        (self.0)(arguments).await
    }
}

struct Tool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(descriptor.name.clone(), Tool { descriptor, handler });
    }

    pub fn register_fn<F, Fut>(&mut self, descriptor: ToolDescriptor, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        self.register(descriptor, Arc::new(FnTool(f)));
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;
        tool.handler.call(arguments).await
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchResponse {
        let res = match req.method.as_str() {
            METHOD_TOOLS_LIST => serde_json::to_value(ToolList { tools: self.list() })
                .map_err(|e| DispatchError::Tool(e.to_string())),
            METHOD_TOOLS_CALL => match serde_json::from_value::<ToolCallParams>(req.params) {
                Ok(p) => {
                    debug!(tool=%p.name, "dispatch: tools/call");
                    self.call(&p.name, p.arguments).await
                }
                Err(e) => Err(DispatchError::InvalidParams(format!("tools/call: {e}"))),
            },
            other => Err(DispatchError::UnknownMethod(other.to_string())),
        };

        match res {
            Ok(v) => DispatchResponse::ok(v),
            Err(e) => {
                warn!(method=%req.method, error=%e, "dispatch: request failed");
                DispatchResponse::fault(e.to_fault())
            }
        }
    }
}

async fn handle_dispatch(
    State(registry): State<Arc<ToolRegistry>>,
    Json(req): Json<DispatchRequest>,
) -> Json<DispatchResponse> {
    Json(registry.dispatch(req).await)
}

/// `POST /dispatch` over the given registry. Merge into the service router.
pub fn router(registry: Arc<ToolRegistry>) -> Router {
    Router::new()
        .route("/dispatch", post(handle_dispatch))
        .with_state(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaultKind;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register_fn(
            ToolDescriptor::new("echo", "Echo the text argument", serde_json::json!({"type": "object"})),
            |args: Value| async move {
                let text = args["text"]
                    .as_str()
                    .ok_or_else(|| DispatchError::InvalidParams("text is required".into()))?;
                Ok::<_, DispatchError>(Value::String(text.to_string()))
            },
        );
        reg
    }

    #[tokio::test]
    async fn test_tools_list() {
        let resp = registry().dispatch(DispatchRequest::list_tools()).await;
        let list: ToolList = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_tools_call() {
        let resp = registry()
            .dispatch(DispatchRequest::call_tool("echo", serde_json::json!({"text": "hi"})))
            .await;
        assert_eq!(resp.result, Some(Value::String("hi".into())));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let reg = registry();

        let resp = reg.dispatch(DispatchRequest::call_tool("nope", Value::Null)).await;
        assert_eq!(resp.error.unwrap().kind, FaultKind::UnknownTool);

        let resp = reg
            .dispatch(DispatchRequest { method: "tools/destroy".into(), params: Value::Null })
            .await;
        assert_eq!(resp.error.unwrap().kind, FaultKind::UnknownMethod);
    }

    #[tokio::test]
    async fn test_bad_params() {
        let reg = registry();
        let resp = reg
            .dispatch(DispatchRequest { method: "tools/call".into(), params: serde_json::json!({"x": 1}) })
            .await;
        assert_eq!(resp.error.unwrap().kind, FaultKind::InvalidParams);

        let resp = reg.dispatch(DispatchRequest::call_tool("echo", serde_json::json!({}))).await;
        assert_eq!(resp.error.unwrap().kind, FaultKind::InvalidParams);
    }

    #[tokio::test]
    async fn test_router_serves_dispatch() {
        let app = router(Arc::new(registry()));
        let body = serde_json::to_vec(&DispatchRequest::call_tool("echo", serde_json::json!({"text": "yo"}))).unwrap();

        let resp = app
            .oneshot(
                Request::post("/dispatch")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let out: DispatchResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out.result, Some(Value::String("yo".into())));
    }
}
