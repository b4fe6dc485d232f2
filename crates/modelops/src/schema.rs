use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable logical key of a model instance ("conversation-model", "execution-model", ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub const CONVERSATION: &'static str = "conversation-model";
    pub const EXECUTION: &'static str = "execution-model";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn conversation() -> Self {
        Self::new(Self::CONVERSATION)
    }

    pub fn execution() -> Self {
        Self::new(Self::EXECUTION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyState {
    Unloaded,
    Loading,
    Loaded,
}

/// Declared shape of one registry entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub role: Role,
    pub identifier: String,      // name the inference runtime understands
    pub pinned: bool,
    pub memory_estimate_mb: u64, // used for admission only
}

impl InstanceSpec {
    pub fn pinned(role: impl Into<Role>, identifier: impl Into<String>, memory_estimate_mb: u64) -> Self {
        Self {
            role: role.into(),
            identifier: identifier.into(),
            pinned: true,
            memory_estimate_mb,
        }
    }

    pub fn evictable(role: impl Into<Role>, identifier: impl Into<String>, memory_estimate_mb: u64) -> Self {
        Self {
            role: role.into(),
            identifier: identifier.into(),
            pinned: false,
            memory_estimate_mb,
        }
    }
}

pub const DEFAULT_MIN_RESIDENT_MB: f64 = 500.0;

/// Category string that routes to the conversation role. Everything else executes.
pub const CONVERSATION_CATEGORY: &str = "conversation";

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub conversation_role: Role,
    pub execution_role: Role,
    pub min_resident_mb: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            conversation_role: Role::conversation(),
            execution_role: Role::execution(),
            min_resident_mb: DEFAULT_MIN_RESIDENT_MB,
        }
    }
}

/// One turn of a chat exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}
