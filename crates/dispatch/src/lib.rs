//! Inter-service dispatch: every service answers `POST /dispatch` with a
//! `{method, params}` envelope. Supported methods are `tools/list` and
//! `tools/call`.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::DispatchClient;
pub use error::DispatchError;
pub use protocol::*;
pub use server::{router, FnTool, ToolHandler, ToolRegistry};
