//! Resource-aware model pool: pinned/evictable model instances over an
//! inference runtime, with admission control and LRU eviction.

pub mod error;
pub mod instance;
pub mod memory;
pub mod pool;
pub mod residency;
pub mod runtime;
pub mod runtime_ollama;
pub mod schema;

pub use error::*;
pub use instance::*;
pub use memory::*;
pub use pool::*;
pub use residency::{CommandResidencyProbe, ResidencyProbe, ResidentModel};
pub use runtime::*;
pub use runtime_ollama::OllamaRuntime;
pub use schema::*;
