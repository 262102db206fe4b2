//! Shared error taxonomy for the hub.
//!
//! Every crate in the workspace that can fail defines its own `thiserror`
//! enum for its own concerns and converts into `HubError` at the boundary
//! where a caller needs one unified type (the dispatch layer, the CLI).

use thiserror::Error;

/// Result alias used at crate boundaries that need the unified error type.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Error taxonomy from spec.md §7, expressed as enum variants rather than
/// separate types so call sites can match on `kind`.
#[derive(Debug, Error)]
pub enum HubError {
    /// Malformed server definition caught at `Load` time.
    #[error("configuration error for server `{server}`: {message}")]
    Configuration { server: String, message: String },

    /// Upstream failed to connect/spawn/initialize and is not currently serving.
    #[error("upstream `{server}` is unavailable: {message}")]
    UpstreamUnavailable { server: String, message: String },

    /// Registry lookup missed.
    #[error("tool `{name}` not found")]
    ToolNotFound { name: String },

    /// Filter engine denial.
    #[error("tool `{tool}` not permitted in context `{context}`")]
    NotPermitted { context: String, tool: String },

    /// JSON-RPC error relayed verbatim from an upstream.
    #[error("upstream `{server}` returned error {code}: {message}")]
    UpstreamCall {
        server: String,
        code: i64,
        message: String,
    },

    /// Hub-side deadline expired waiting on an upstream.
    #[error("deadline exceeded waiting on `{server}`")]
    DeadlineExceeded { server: String },

    /// Session-level framing or I/O error; the session must reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Persistence operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Requested context name does not exist.
    #[error("unknown context `{0}`")]
    UnknownContext(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// The MCP-ish error code this kind maps to, per spec.md §6/§7.
    /// Ranges follow JSON-RPC reserved codes where one applies, with a
    /// hub-specific code (`-32001`) for the context-permission denial that
    /// has no standard JSON-RPC equivalent.
    pub fn rpc_code(&self) -> i64 {
        match self {
            HubError::ToolNotFound { .. } => -32601, // method not found
            HubError::Configuration { .. } | HubError::Json(_) => -32602, // invalid params
            HubError::NotPermitted { .. } => -32001, // hub-specific
            HubError::DeadlineExceeded { .. } => -32002,
            HubError::UpstreamUnavailable { .. } | HubError::UpstreamCall { .. } => -32003,
            HubError::Transport(_) | HubError::Storage(_) | HubError::UnknownContext(_) => -32603, // internal error
        }
    }
}
