//! JSON-RPC 2.0 envelope and MCP method names (spec.md §6).
//!
//! Inbound parsing mirrors `diane_upstream::rpc::parse_inbound`, read in the
//! server direction: here we're the callee, not the caller, so there's no
//! pending-request table, only request/notification discrimination.

use serde_json::{json, Value};

use diane_core::HubError;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// The protocol version this hub advertises in every `initialize` response
/// (spec.md §4.4: "the hub advertises a fixed version string").
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Versions old enough for the hub to still understand, oldest first. A
/// client requesting any of these (including the current one) is accepted;
/// anything else is rejected rather than silently downgraded.
const KNOWN_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

/// Accept a client-requested protocol version if the hub recognizes it
/// (spec.md §4.4: "accepts clients requesting equal-or-older versions it
/// recognizes"). The hub always responds with its own fixed version
/// regardless of which recognized version was requested.
pub fn negotiate_version(requested: &str) -> Result<(), HubError> {
    if KNOWN_VERSIONS.contains(&requested) {
        Ok(())
    } else {
        Err(HubError::Transport(format!(
            "unsupported protocol version `{requested}`"
        )))
    }
}

/// A parsed inbound message: a request carries an `id` and expects a
/// response; a notification carries no `id` and expects none.
pub struct InboundMessage {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

pub fn parse_inbound(raw: &Value) -> Option<InboundMessage> {
    let method = raw.get("method")?.as_str()?.to_string();
    Some(InboundMessage {
        id: raw.get("id").cloned(),
        method,
        params: raw.get("params").cloned().unwrap_or(Value::Null),
    })
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn error_response(id: Option<Value>, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

pub fn error_from_hub(id: Option<Value>, err: &HubError) -> Value {
    error_response(id, err.rpc_code(), err.to_string())
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_id() {
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});
        let msg = parse_inbound(&raw).unwrap();
        assert_eq!(msg.method, "tools/list");
        assert_eq!(msg.id, Some(json!(1)));
    }

    #[test]
    fn parses_notification_with_no_id() {
        let raw = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let msg = parse_inbound(&raw).unwrap();
        assert!(msg.id.is_none());
    }

    #[test]
    fn accepts_known_versions_only() {
        assert!(negotiate_version("2025-03-26").is_ok());
        assert!(negotiate_version("2024-11-05").is_ok());
        assert!(negotiate_version("1999-01-01").is_err());
    }
}
