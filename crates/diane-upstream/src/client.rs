//! The common interface every upstream client kind implements (spec.md
//! §4.1, §9: "model them as a sum type with one interface... rather than
//! inheritance").

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use serde_json::Value;

use crate::error::Result;

/// Lifecycle state shared by stdio/http/sse clients (spec.md §4.1). Builtin
/// clients only ever occupy `Ready` or `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Spawning,
    Initializing,
    Ready,
    Degraded,
    Dead,
}

/// An event the manager's change stream fans out on (spec.md §4.1
/// `Subscribe`). Carries no payload beyond "something changed" per
/// spec.md §4.5 — sessions coalesce repeats into one notification.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub server: String,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Bring the client to `Ready` (or `Dead` on failure). Idempotent:
    /// calling it again while already ready is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Current tool set, as last fetched from `tools/list` (or the
    /// provider's `Tools()` for builtins).
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Proxy a single `tools/call`. `original_name` is the tool name as
    /// known to the upstream, not the hub's public name.
    async fn call_tool(&self, original_name: &str, args: Value) -> Result<Value>;

    /// Tear the client down: kill the child / close the socket / cancel
    /// the background tasks. Must not block on in-flight calls beyond a
    /// short grace window (spec.md §5).
    async fn shutdown(&self);

    fn state(&self) -> ClientState;
}
