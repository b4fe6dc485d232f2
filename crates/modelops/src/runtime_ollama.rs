use async_trait::async_trait;
use std::time::Duration;

use crate::{ChatTurn, InferenceRuntime, RuntimeError, RuntimeInfo};

const KEEP_ALIVE: &str = "30m";

pub struct OllamaRuntime {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaRuntime {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(base_url: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(url).json(&body).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl InferenceRuntime for OllamaRuntime {
    async fn load(&self, model: &str) -> Result<(), RuntimeError> {
        // An empty prompt makes the runtime pull the model into memory without generating.
        let body = serde_json::json!({
            "model": model,
            "prompt": "",
            "stream": false,
            "keep_alive": KEEP_ALIVE,
        });
        self.post_json("/api/generate", body).await?;
        Ok(())
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, RuntimeError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "keep_alive": KEEP_ALIVE,
        });
        let json = self.post_json("/api/generate", body).await?;

        match json["response"].as_str() {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(RuntimeError::Malformed(format!("generate for {model}: missing `response`"))),
        }
    }

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String, RuntimeError> {
        let body = serde_json::json!({
            "model": model,
            "messages": turns,
            "stream": false,
            "keep_alive": KEEP_ALIVE,
        });
        let json = self.post_json("/api/chat", body).await?;

        match json["message"]["content"].as_str() {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(RuntimeError::Malformed(format!("chat for {model}: missing `message.content`"))),
        }
    }

    async fn health(&self) -> Result<(), RuntimeError> {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            name: "ollama".to_string(),
            base_url: self.base_url.clone(),
        }
    }
}
