//! `clock`: the one example builtin this hub ships, purely to exercise the
//! builtin plumbing end to end (spec.md §4.7, SPEC_FULL.md §4.7). It has no
//! external dependency so `check_dependencies` always succeeds.

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use serde_json::json;

use crate::{Availability, BuiltinError, BuiltinProvider};

pub struct ClockProvider;

impl ClockProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuiltinProvider for ClockProvider {
    fn name(&self) -> &str {
        "clock"
    }

    async fn check_dependencies(&self) -> Availability {
        Availability::Available
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "now".to_string(),
            description: "Return the current UTC time in RFC 3339 format".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }]
    }

    async fn call(&self, name: &str, _args: serde_json::Value) -> Result<serde_json::Value, BuiltinError> {
        match name {
            "now" => Ok(json!({ "now": chrono::Utc::now().to_rfc3339() })),
            other => Err(BuiltinError::ToolNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn now_returns_rfc3339_timestamp() {
        let provider = ClockProvider::new();
        let result = provider.call("now", json!({})).await.unwrap();
        let ts = result["now"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let provider = ClockProvider::new();
        let err = provider.call("bogus", json!({})).await.unwrap_err();
        assert!(matches!(err, BuiltinError::ToolNotFound(_)));
    }
}
