//! Shared domain types and error taxonomy for the Diane MCP hub.
//!
//! This crate has no I/O of its own; it is the vocabulary the rest of the
//! workspace (`diane-storage`, `diane-upstream`, `diane-hub`) shares so that
//! none of them depend on each other just to pass a `ServerDefinition`
//! around.

pub mod error;
pub mod model;
pub mod naming;

pub use error::{HubError, HubResult};
pub use model::{
    Context, ContextServer, ContextSource, LiveTool, OAuthDescriptor, Placement, PlacementHint,
    PlacementMode, ServerDefinition, ToolDescriptor, ToolOverride, Transport,
};
