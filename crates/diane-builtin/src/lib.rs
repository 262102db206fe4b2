//! In-process builtin provider plumbing (spec.md §4.7).
//!
//! A builtin contributes tools without a subprocess or network hop: the
//! hub dispatches directly into [`BuiltinProvider::call`]. Providers are
//! registered once at process start in a [`BuiltinRegistry`]; the registry
//! is consulted by `diane-upstream`'s manager the same way it would consult
//! a stdio or HTTP client, so the rest of the hub never has to know a given
//! server is builtin versus proxied.

mod clock;

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

pub use clock::ClockProvider;

/// Outcome of a provider's startup dependency probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// The provider can serve calls.
    Available,
    /// Missing a secret, binary, or other precondition; the provider
    /// contributes no tools but its persistence row is kept (spec.md §4.7)
    /// so a UI can prompt for the missing credential.
    Unavailable { reason: String },
}

/// Error returned by a builtin tool call. Distinct from `diane_core::HubError`
/// so this crate has no dependency on the dispatch-layer error taxonomy;
/// callers wrap it into `HubError::UpstreamCall` at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum BuiltinError {
    #[error("tool `{0}` not found on this builtin")]
    ToolNotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Other(String),
}

/// The interface an in-process provider must satisfy (spec.md §4.7).
#[async_trait]
pub trait BuiltinProvider: Send + Sync {
    /// Stable name; also the persisted server row's name and the builtin's
    /// flat (unprefixed) tool namespace per spec.md §4.2.
    fn name(&self) -> &str;

    /// Probe run once at startup. Missing secrets/binaries demote the
    /// provider to `Unavailable` rather than panicking or crashing the hub.
    async fn check_dependencies(&self) -> Availability;

    /// The tool set this provider contributes when available.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Dispatch a call by the tool's original (unprefixed) name.
    async fn call(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, BuiltinError>;
}

/// Registry of providers wired at process start (spec.md §4.7: "Providers
/// are registered at process start; their names are the same identifiers
/// used for builtin rows in persistence").
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    providers: HashMap<String, Arc<dyn BuiltinProvider>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Panics on duplicate names since this only runs
    /// once at startup wiring and a collision there is a programming error,
    /// not a runtime condition to recover from.
    pub fn register(&mut self, provider: Arc<dyn BuiltinProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            panic!("duplicate builtin provider registered: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BuiltinProvider>> {
        self.providers.values()
    }
}

/// Build the registry shipped with this hub: just `clock`, kept trivial on
/// purpose (spec.md §1: the real builtin families — mail, calendar,
/// weather, banking, places, Cloudflare DNS — are out of scope; this one
/// exists purely to exercise the plumbing end to end).
pub fn default_registry() -> BuiltinRegistry {
    let mut registry = BuiltinRegistry::new();
    registry.register(Arc::new(ClockProvider::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_looks_up_registered_provider_by_name() {
        let registry = default_registry();
        let provider = registry.get("clock").expect("clock registered");
        assert_eq!(provider.check_dependencies().await, Availability::Available);
        assert!(!provider.tools().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate builtin provider registered")]
    fn duplicate_registration_panics() {
        let mut registry = BuiltinRegistry::new();
        registry.register(Arc::new(ClockProvider::new()));
        registry.register(Arc::new(ClockProvider::new()));
    }
}
