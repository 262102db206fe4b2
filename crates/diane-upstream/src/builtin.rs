//! Adapts an in-process `diane_builtin::BuiltinProvider` to the same
//! `UpstreamClient` interface the network-backed clients implement, so
//! the registry and manager can treat every server kind uniformly
//! (spec.md §4.1, §9).

use async_trait::async_trait;
use diane_builtin::{Availability, BuiltinProvider};
use diane_core::model::ToolDescriptor;
use serde_json::Value;
use std::sync::Arc;

use crate::client::{ClientState, UpstreamClient};
use crate::error::{Result, UpstreamError};

pub struct BuiltinClient {
    provider: Arc<dyn BuiltinProvider>,
}

impl BuiltinClient {
    pub fn new(provider: Arc<dyn BuiltinProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl UpstreamClient for BuiltinClient {
    async fn initialize(&self) -> Result<()> {
        match self.provider.check_dependencies().await {
            Availability::Available => Ok(()),
            Availability::Unavailable { reason } => Err(UpstreamError::Unavailable {
                server: self.provider.name().to_string(),
                message: reason,
            }),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.provider.tools())
    }

    async fn call_tool(&self, original_name: &str, args: Value) -> Result<Value> {
        self.provider
            .call(original_name, args)
            .await
            .map_err(|e| UpstreamError::Call {
                server: self.provider.name().to_string(),
                code: -32602,
                message: e.to_string(),
            })
    }

    async fn shutdown(&self) {}

    fn state(&self) -> ClientState {
        ClientState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diane_builtin::default_registry;

    #[tokio::test]
    async fn wraps_clock_provider_and_proxies_calls() {
        let registry = default_registry();
        let provider = registry.get("clock").expect("clock registered");
        let client = BuiltinClient::new(provider);
        client.initialize().await.unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        let result = client.call_tool("now", Value::Null).await.unwrap();
        assert!(result.get("now").is_some());
    }

    #[tokio::test]
    async fn unknown_tool_becomes_call_error() {
        let registry = default_registry();
        let provider = registry.get("clock").expect("clock registered");
        let client = BuiltinClient::new(provider);
        let err = client.call_tool("bogus", Value::Null).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Call { .. }));
    }
}
