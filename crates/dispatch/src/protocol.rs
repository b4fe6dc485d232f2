use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl DispatchRequest {
    pub fn list_tools() -> Self {
        Self { method: METHOD_TOOLS_LIST.to_string(), params: Value::Null }
    }

    pub fn call_tool(name: &str, arguments: Value) -> Self {
        Self {
            method: METHOD_TOOLS_CALL.to_string(),
            params: serde_json::json!({ "name": name, "arguments": arguments }),
        }
    }
}

/// Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchFault>,
}

impl DispatchResponse {
    pub fn ok(result: Value) -> Self {
        Self { result: Some(result), error: None }
    }

    pub fn fault(error: DispatchFault) -> Self {
        Self { result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Transport,
    UnknownMethod,
    UnknownTool,
    InvalidParams,
    ToolError,
}

impl FaultKind {
    pub fn code(self) -> i64 {
        match self {
            FaultKind::UnknownMethod => -32601,
            FaultKind::InvalidParams => -32602,
            FaultKind::ToolError => -32000,
            FaultKind::Transport => -32002,
            FaultKind::UnknownTool => -32004,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFault {
    pub kind: FaultKind,
    pub code: i64,
    pub message: String,
    /// Structured detail from the tool, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<ToolDescriptor>,
}
