//! Upstream MCP client manager (spec.md §4.1): owns one client per
//! configured server — stdio subprocess, HTTP, SSE, or an in-process
//! builtin — behind a single `UpstreamClient` trait, aggregates their
//! tools into a public-name registry, and fans out "something changed"
//! events so downstream sessions can invalidate their own notification
//! state.

mod builtin;
mod client;
mod error;
mod http;
mod manager;
mod registry;
mod rpc;
mod sse;
mod stdio;

pub use builtin::BuiltinClient;
pub use client::{ChangeEvent, ClientState, UpstreamClient};
pub use error::{Result, UpstreamError};
pub use http::{HttpClient, HttpConfig};
pub use manager::{ManagerConfig, UpstreamManager};
pub use registry::{RegisteredTool, SharedRegistry, ToolRegistry};
pub use sse::{SseClient, SseConfig};
pub use stdio::{StdioClient, StdioConfig};
