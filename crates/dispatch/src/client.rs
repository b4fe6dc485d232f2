use serde_json::Value;
use std::time::Duration;

use crate::protocol::{DispatchRequest, DispatchResponse, ToolDescriptor, ToolList};
use crate::DispatchError;

/// Client side of the dispatch transport.
#[derive(Clone, Debug)]
pub struct DispatchClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl DispatchClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(base_url, reqwest::Client::new(), timeout)
    }

    /// Share one connection pool across clients pointed at different hosts.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, req: &DispatchRequest) -> Result<Value, DispatchError> {
        let url = format!("{}/dispatch", self.base_url);
        let resp: DispatchResponse = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (resp.result, resp.error) {
            (_, Some(fault)) => Err(fault.into()),
            (Some(v), None) => Ok(v),
            (None, None) => Err(DispatchError::Transport("empty dispatch response".to_string())),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, DispatchError> {
        let v = self.send(&DispatchRequest::list_tools()).await?;
        let list: ToolList =
            serde_json::from_value(v).map_err(|e| DispatchError::Transport(format!("bad tools/list payload: {e}")))?;
        Ok(list.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
        self.send(&DispatchRequest::call_tool(name, arguments)).await
    }

    /// Best effort: any failure is `false`.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(url).timeout(Duration::from_secs(5)).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}
