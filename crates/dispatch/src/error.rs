use serde_json::Value;
use thiserror::Error;

use crate::protocol::{DispatchFault, FaultKind};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The tool ran and failed.
    #[error("tool failed: {0}")]
    Tool(String),

    /// The tool ran and failed, with machine-readable detail for the caller.
    #[error("tool failed: {message}")]
    ToolDetail { message: String, data: Value },
}

impl DispatchError {
    pub fn kind(&self) -> FaultKind {
        match self {
            DispatchError::Transport(_) => FaultKind::Transport,
            DispatchError::UnknownMethod(_) => FaultKind::UnknownMethod,
            DispatchError::UnknownTool(_) => FaultKind::UnknownTool,
            DispatchError::InvalidParams(_) => FaultKind::InvalidParams,
            DispatchError::Tool(_) | DispatchError::ToolDetail { .. } => FaultKind::ToolError,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            DispatchError::ToolDetail { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn to_fault(&self) -> DispatchFault {
        let message = match self {
            DispatchError::Transport(m)
            | DispatchError::UnknownMethod(m)
            | DispatchError::UnknownTool(m)
            | DispatchError::InvalidParams(m)
            | DispatchError::Tool(m)
            | DispatchError::ToolDetail { message: m, .. } => m.clone(),
        };
        DispatchFault {
            kind: self.kind(),
            code: self.kind().code(),
            message,
            data: self.data().cloned(),
        }
    }
}

impl From<DispatchFault> for DispatchError {
    fn from(f: DispatchFault) -> Self {
        match f.kind {
            FaultKind::Transport => DispatchError::Transport(f.message),
            FaultKind::UnknownMethod => DispatchError::UnknownMethod(f.message),
            FaultKind::UnknownTool => DispatchError::UnknownTool(f.message),
            FaultKind::InvalidParams => DispatchError::InvalidParams(f.message),
            FaultKind::ToolError => match f.data {
                Some(data) => DispatchError::ToolDetail { message: f.message, data },
                None => DispatchError::Tool(f.message),
            },
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        DispatchError::Transport(e.to_string())
    }
}
