use crate::Role;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// The pool could not hand out a model: no memory even after eviction, or the load failed.
    #[error("resource unavailable for {role}: {reason}")]
    ResourceUnavailable { role: Role, reason: String },

    #[error("model {role} failed: {source}")]
    Execution {
        role: Role,
        #[source]
        source: RuntimeError,
    },

    #[error("residency check failed: {0}")]
    Residency(String),

    #[error("unknown role: {0}")]
    UnknownRole(Role),
}

/// Failure reported by the inference runtime itself.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
