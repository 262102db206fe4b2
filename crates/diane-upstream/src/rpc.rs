//! Outbound JSON-RPC request framing and response correlation, shared by
//! the stdio, HTTP, and SSE upstream clients (spec.md §4.1: "a pending-
//! request table guarded by a single mutex, never held across I/O").

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use diane_core::model::ToolDescriptor;
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Builds a `{jsonrpc, id, method, params}` request object with the next
/// monotonic id, returning both the wire payload and a receiver that
/// resolves when the matching response (or notification-shaped error)
/// arrives.
pub struct PendingTable {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh request id and register a waiter for its reply.
    /// Returns the id plus a receiver; the mutex is held only for the
    /// duration of the `insert`, never across I/O.
    pub fn register(&self) -> (i64, oneshot::Receiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    /// Route an inbound message keyed by its `id` field to the waiter that
    /// registered it. Silently drops replies with no matching waiter
    /// (late reply after a timeout already gave up).
    pub fn complete(&self, id: i64, value: Value) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&id) {
            let _ = tx.send(value);
        }
    }

    /// Fail every outstanding waiter, e.g. because the underlying
    /// transport died. Called with the mutex released before I/O, as with
    /// every other method here.
    pub fn fail_all(&self) {
        let mut guard = self.pending.lock().unwrap();
        for (_, tx) in guard.drain() {
            let _ = tx.send(json!({
                "error": { "code": -32003, "message": "upstream connection closed" }
            }));
        }
    }
}

pub fn build_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// `id` field present → either a response to one of our requests, or (in
/// the stdio/SSE case) a request _from_ the upstream that we don't serve
/// (upstreams never make requests of their proxy in this hub); `method`
/// field with no `id` → a notification such as `notifications/tools/list_changed`.
pub enum InboundMessage {
    Response { id: i64, payload: Value },
    Notification { method: String, params: Value },
}

pub fn parse_inbound(raw: &Value) -> Option<InboundMessage> {
    if let Some(id) = raw.get("id").and_then(parse_id) {
        if raw.get("result").is_some() || raw.get("error").is_some() {
            return Some(InboundMessage::Response {
                id,
                payload: raw.clone(),
            });
        }
    }
    if let Some(method) = raw.get("method").and_then(|m| m.as_str()) {
        return Some(InboundMessage::Notification {
            method: method.to_string(),
            params: raw.get("params").cloned().unwrap_or(Value::Null),
        });
    }
    None
}

fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract `result` from a JSON-RPC response, or convert `error` into an
/// `(code, message)` pair for the caller to wrap as `UpstreamError::Call`.
pub fn split_response(payload: Value) -> Result<Value, (i64, String)> {
    if let Some(error) = payload.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("upstream error")
            .to_string();
        return Err((code, message));
    }
    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}

/// Parse a `tools/list` result's `tools` array into our shared
/// `ToolDescriptor` shape, skipping any entry missing a `name`.
pub fn parse_tool_list(result: &Value) -> Vec<ToolDescriptor> {
    result
        .get("tools")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            let description = t
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let input_schema = t.get("inputSchema").cloned().unwrap_or_else(|| json!({}));
            Some(ToolDescriptor {
                name,
                description,
                input_schema,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_complete_round_trips() {
        let table = PendingTable::new();
        let (id, rx) = table.register();
        table.complete(id, json!({"result": {"ok": true}}));
        let value = rx.await.unwrap();
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn complete_with_no_waiter_is_a_noop() {
        let table = PendingTable::new();
        table.complete(42, json!({"result": null}));
    }

    #[test]
    fn parses_response_vs_notification() {
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert!(matches!(
            parse_inbound(&response),
            Some(InboundMessage::Response { id: 1, .. })
        ));

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"});
        assert!(matches!(
            parse_inbound(&notification),
            Some(InboundMessage::Notification { .. })
        ));
    }

    #[test]
    fn split_response_extracts_error_code_and_message() {
        let err = json!({"error": {"code": -32601, "message": "not found"}});
        let result = split_response(err);
        assert_eq!(result, Err((-32601, "not found".to_string())));
    }

    #[test]
    fn parses_tool_list_result_shape() {
        let result = json!({
            "tools": [
                {"name": "list_repos", "description": "List repos", "inputSchema": {"type": "object"}}
            ]
        });
        let tools = parse_tool_list(&result);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_repos");
    }
}
