//! HTTP-streamable frontend transport (spec.md §4.4, §6): `POST /mcp`
//! either starts a session (no session header present) or continues one
//! (session header echoed back). Grounded on
//! `crucible_acp::mcp_host::InProcessMcpHost`'s axum/`CancellationToken`
//! wiring, generalized here from SSE-only hosting to a plain
//! request/response router plus the session bookkeeping spec.md §4.4
//! describes for this transport specifically.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context_resolve;
use crate::dispatch::Dispatch;
use crate::protocol;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

pub fn router(dispatch: Arc<Dispatch>) -> Router {
    super::health_router()
        .route("/mcp", post(handle_post))
        .with_state(dispatch)
}

/// Bind `addr`, serve the router, and run the idle-session reaper until
/// `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    dispatch: Arc<Dispatch>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let reaper_dispatch = dispatch.clone();
    let reaper_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(idle_timeout.min(Duration::from_secs(30)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for id in reaper_dispatch.sessions().reap_idle(idle_timeout) {
                        tracing::debug!(session = %id, "reaped idle HTTP session");
                    }
                }
                _ = reaper_shutdown.cancelled() => return,
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(dispatch);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle_post(
    State(dispatch): State<Arc<Dispatch>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let existing_session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (session, is_new) = match existing_session_id {
        Some(id) => match dispatch.sessions().get(&id) {
            Some(session) => (session, false),
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(protocol::error_response(
                        None,
                        -32600,
                        format!("unknown session `{id}`"),
                    )),
                )
                    .into_response();
            }
        },
        None => {
            let header_context = headers
                .get(context_resolve::HEADER_NAME)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let candidate = context_resolve::pick(
                query.get(context_resolve::QUERY_PARAM).cloned(),
                header_context,
                None,
            );
            let context = match dispatch.resolve_context(candidate) {
                Ok(context) => context,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(protocol::error_from_hub(None, &e)),
                    )
                        .into_response();
                }
            };
            let id = uuid::Uuid::new_v4().to_string();
            (dispatch.create_session(id, context), true)
        }
    };

    let response_body = process_body(&dispatch, &session, body).await;

    let mut response = match response_body {
        Some(value) => (StatusCode::OK, Json(value)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if is_new {
        if let Ok(value) = HeaderValue::from_str(&session.id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

/// Handle a single JSON-RPC message or a batch array of them, matching the
/// shape the caller sent (spec.md §4.4: "a single JSON object or a chunked
/// stream... when the handler produces multiple" — a batch array is this
/// router's non-streaming equivalent of that).
async fn process_body(
    dispatch: &Arc<Dispatch>,
    session: &Arc<crate::session::Session>,
    body: Value,
) -> Option<Value> {
    if let Value::Array(messages) = body {
        let mut responses = Vec::new();
        for message in messages {
            if let Some(response) = dispatch_one(dispatch, session, message).await {
                responses.push(response);
            }
        }
        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    } else {
        dispatch_one(dispatch, session, body).await
    }
}

async fn dispatch_one(
    dispatch: &Arc<Dispatch>,
    session: &Arc<crate::session::Session>,
    message: Value,
) -> Option<Value> {
    let Some(msg) = protocol::parse_inbound(&message) else {
        return Some(protocol::error_response(
            None,
            -32600,
            "malformed JSON-RPC message".to_string(),
        ));
    };
    dispatch
        .handle_request(session, &msg.method, msg.id, msg.params)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use diane_core::model::{ServerDefinition, Transport};
    use diane_storage::{Store, StoreConfig, StorePool};
    use diane_upstream::{ManagerConfig, UpstreamManager};
    use std::collections::HashMap as StdHashMap;

    async fn test_dispatch() -> Arc<Dispatch> {
        let store = Arc::new(Store::new(StorePool::new(StoreConfig::in_memory()).unwrap()));
        store.ensure_default_context().unwrap();
        store
            .upsert_server(&ServerDefinition {
                name: "gh".to_string(),
                transport: Transport::Stdio {
                    command: "echo".to_string(),
                    args: vec![],
                    env: StdHashMap::new(),
                },
                enabled: true,
                placement: None,
            })
            .unwrap();
        store
            .set_context_server(diane_storage::DEFAULT_CONTEXT_NAME, "gh", true)
            .unwrap();

        let manager = UpstreamManager::new(diane_builtin::BuiltinRegistry::new(), ManagerConfig {
            call_deadline: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(20),
            ready_timeout: Duration::from_millis(50),
        });
        manager.seed_tools(
            "gh",
            vec![diane_core::model::ToolDescriptor {
                name: "list_repos".to_string(),
                description: String::new(),
                input_schema: serde_json::json!({}),
            }],
            false,
        );
        Arc::new(Dispatch::new(store, manager))
    }

    #[tokio::test]
    async fn first_post_without_session_header_creates_one() {
        let dispatch = test_dispatch().await;
        let response = handle_post(
            State(dispatch.clone()),
            Query(HashMap::new()),
            HeaderMap::new(),
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_some());
        assert_eq!(dispatch.sessions().len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_header_is_rejected() {
        let dispatch = test_dispatch().await;
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("bogus-session"));
        let response = handle_post(
            State(dispatch),
            Query(HashMap::new()),
            headers,
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_context_wins_over_header_on_session_creation() {
        let dispatch = test_dispatch().await;
        dispatch.store().create_context("work", "Work").unwrap();
        dispatch
            .store()
            .set_context_server("work", "gh", true)
            .unwrap();

        let mut query = HashMap::new();
        query.insert("context".to_string(), "work".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(
            context_resolve::HEADER_NAME,
            HeaderValue::from_static("personal"),
        );

        let response = handle_post(
            State(dispatch.clone()),
            Query(query),
            headers,
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})),
        )
        .await;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let session = dispatch.sessions().get(&session_id).unwrap();
        assert_eq!(session.context(), "work");
    }
}
