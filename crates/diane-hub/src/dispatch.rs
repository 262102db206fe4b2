//! Session & Dispatch (spec.md §4.5): the glue between transport events and
//! the registry + filter engine. Grounded on `crucible-acp::client`'s
//! request/response correlation discipline, generalized from "one ACP
//! agent" to "the MCP method set this hub itself serves."

use std::sync::Arc;

use serde_json::{json, Value};

use diane_core::HubError;
use diane_storage::Store;
use diane_upstream::UpstreamManager;

use crate::context_resolve::ContextCandidate;
use crate::filter::FilterEngine;
use crate::protocol::{
    self, METHOD_INITIALIZE, METHOD_INITIALIZED_NOTIFICATION, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, NOTIFICATION_TOOLS_LIST_CHANGED,
};
use crate::session::{Session, SessionRegistry};

pub const SERVER_NAME: &str = "diane-hub";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The process-wide collaborators a transport needs: persistence, the
/// upstream manager, the filter engine built over both, and the session
/// registry transports share for notification fan-out (spec.md §9:
/// "dependency-injected collaborators; do not use ad-hoc singletons").
#[derive(Clone)]
pub struct Dispatch {
    store: Arc<Store>,
    manager: Arc<UpstreamManager>,
    filter: Arc<FilterEngine>,
    sessions: SessionRegistry,
}

impl Dispatch {
    pub fn new(store: Arc<Store>, manager: Arc<UpstreamManager>) -> Self {
        let filter = Arc::new(FilterEngine::new(store.clone(), manager.clone()));
        Self {
            store,
            manager,
            filter,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    /// Spawn the tasks that listen for upstream change events and for
    /// persisted writes that affect visibility, fanning both out as
    /// coalesced "something changed" wakeups to every active session
    /// (spec.md §4.1 Subscribe, §4.5 fan-out, §8 property 4). Two sources,
    /// two tasks: an upstream tool-set change and a policy write are
    /// unrelated events that happen to produce the same downstream effect.
    pub fn spawn_change_listener(&self) {
        let mut upstream_rx = self.manager.subscribe();
        let upstream_sessions = self.sessions.clone();
        tokio::spawn(async move {
            while upstream_rx.recv().await.is_ok() {
                upstream_sessions.notify_all();
            }
        });

        let mut policy_rx = self.store.subscribe();
        let policy_sessions = self.sessions.clone();
        tokio::spawn(async move {
            while policy_rx.recv().await.is_ok() {
                policy_sessions.notify_all();
            }
        });
    }

    /// Bind a new session's context per the precedence rule (spec.md §4.3):
    /// explicit candidate (query/header/env) wins if present and must name
    /// an existing context; otherwise fall back to the persisted default.
    pub fn resolve_context(&self, candidate: Option<ContextCandidate>) -> Result<String, HubError> {
        match candidate {
            Some(candidate) => {
                self.filter.validate_context_name(&candidate.name)?;
                Ok(candidate.name)
            }
            None => self.filter.default_context_name(),
        }
    }

    pub fn create_session(&self, id: String, context: String) -> Arc<Session> {
        let session = Session::new(id, context);
        self.sessions.insert(session.clone());
        session
    }

    pub fn close_session(&self, id: &str) {
        if let Some(session) = self.sessions.remove(id) {
            session.cancel();
        }
    }

    /// Dispatch one inbound JSON-RPC request to its method handler. Returns
    /// `None` for a notification (no response expected) or when processing
    /// it fails silently per the MCP spec (unknown notifications are
    /// ignored, not errored).
    pub async fn handle_request(&self, session: &Arc<Session>, method: &str, id: Option<Value>, params: Value) -> Option<Value> {
        session.touch();
        match method {
            METHOD_INITIALIZE => Some(self.handle_initialize(session, id, params)),
            METHOD_TOOLS_LIST => Some(self.handle_tools_list(session, id)),
            METHOD_TOOLS_CALL => Some(self.handle_tools_call(session, id, params).await),
            METHOD_INITIALIZED_NOTIFICATION => None,
            other => id.map(|id| {
                protocol::error_response(
                    Some(id),
                    -32601,
                    format!("method not found: {other}"),
                )
            }),
        }
    }

    fn handle_initialize(&self, session: &Arc<Session>, id: Option<Value>, params: Value) -> Value {
        let Some(id) = id else {
            return protocol::error_response(None, -32600, "initialize must be a request".to_string());
        };

        if let Some(requested) = params.get("protocolVersion").and_then(|v| v.as_str()) {
            if let Err(e) = protocol::negotiate_version(requested) {
                return protocol::error_from_hub(Some(id), &e);
            }
        }

        session.mark_initialized();

        protocol::success_response(
            id,
            json!({
                "protocolVersion": protocol::PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                },
            }),
        )
    }

    fn handle_tools_list(&self, session: &Arc<Session>, id: Option<Value>) -> Value {
        let Some(id) = id else {
            return protocol::error_response(None, -32600, "tools/list must be a request".to_string());
        };
        match self.filter.visible_tools(&session.context()) {
            Ok(tools) => {
                let tools_json: Vec<Value> = tools
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.public_name,
                            "description": t.description,
                            "inputSchema": t.input_schema,
                        })
                    })
                    .collect();
                protocol::success_response(id, json!({ "tools": tools_json }))
            }
            Err(e) => protocol::error_from_hub(Some(id), &e),
        }
    }

    async fn handle_tools_call(&self, session: &Arc<Session>, id: Option<Value>, params: Value) -> Value {
        let Some(id) = id else {
            return protocol::error_response(None, -32600, "tools/call must be a request".to_string());
        };

        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return protocol::error_response(Some(id), -32602, "missing `name`".to_string());
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let context = session.context();
        if let Err(e) = self.filter.may_call(&context, name) {
            return protocol::error_from_hub(Some(id), &e);
        }

        match self.manager.call_tool(name, arguments).await {
            Ok(result) => protocol::success_response(id, result),
            Err(e) => {
                let hub_err = match e {
                    diane_upstream::UpstreamError::Unavailable { server, message } => {
                        HubError::UpstreamUnavailable { server, message }
                    }
                    diane_upstream::UpstreamError::Call { server, code, message } => {
                        HubError::UpstreamCall { server, code, message }
                    }
                    diane_upstream::UpstreamError::DeadlineExceeded { server } => {
                        HubError::DeadlineExceeded { server }
                    }
                    diane_upstream::UpstreamError::ToolNotFound(name) => HubError::ToolNotFound { name },
                    other => HubError::Transport(other.to_string()),
                };
                protocol::error_from_hub(Some(id), &hub_err)
            }
        }
    }

    pub fn notification_tools_changed() -> Value {
        protocol::notification(NOTIFICATION_TOOLS_LIST_CHANGED, Value::Null)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<UpstreamManager> {
        &self.manager
    }
}
