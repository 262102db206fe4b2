//! SSE frontend transport (spec.md §4.4, §6): `GET /mcp/sse` opens a
//! long-lived event stream and hands back an `endpoint` event naming the
//! URL the client POSTs requests to; responses and change notifications
//! both arrive over the same stream. Framing mirrors
//! `diane_upstream::sse::SseClient`'s client-side parser, run here in the
//! server role.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::context_resolve;
use crate::dispatch::Dispatch;
use crate::protocol;

/// Depth of a connection's outbound queue: responses plus coalesced change
/// notifications. Generous relative to the session notify channel's depth-1
/// coalescing since this one also carries real JSON-RPC payloads, not just
/// wakeups.
const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// How long a POST waits to hand its response to a connection's outbound
/// queue before giving up on a client that stopped reading its stream.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct OutboundChannels {
    senders: Arc<DashMap<String, mpsc::Sender<Value>>>,
}

#[derive(Clone)]
struct SseState {
    dispatch: Arc<Dispatch>,
    outbound: OutboundChannels,
}

pub fn router(dispatch: Arc<Dispatch>) -> Router {
    let state = SseState {
        dispatch,
        outbound: OutboundChannels::default(),
    };
    super::health_router()
        .route("/mcp/sse", get(handle_stream))
        .route("/mcp/message", post(handle_message))
        .with_state(state)
}

/// Bind `addr` and serve the SSE router until `shutdown` is cancelled.
pub async fn serve(
    addr: std::net::SocketAddr,
    dispatch: Arc<Dispatch>,
    shutdown: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(dispatch);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle_stream(
    State(state): State<SseState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    headers: axum::http::HeaderMap,
) -> Response {
    let header_context = headers
        .get(context_resolve::HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let candidate = context_resolve::pick(
        query.get(context_resolve::QUERY_PARAM).cloned(),
        header_context,
        None,
    );
    let context = match state.dispatch.resolve_context(candidate) {
        Ok(context) => context,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(protocol::error_from_hub(None, &e)),
            )
                .into_response();
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = state.dispatch.create_session(session_id.clone(), context);

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    state.outbound.senders.insert(session_id.clone(), tx);

    let mut notify_rx = session
        .take_notify_receiver()
        .expect("SSE session's notify receiver taken exactly once");
    let notify_tx = state
        .outbound
        .senders
        .get(&session_id)
        .expect("just inserted")
        .clone();
    tokio::spawn(async move {
        while notify_rx.recv().await.is_some() {
            if notify_tx
                .send(Dispatch::notification_tools_changed())
                .await
                .is_err()
            {
                return;
            }
        }
    });

    let endpoint_event = Event::default()
        .event("endpoint")
        .data(format!("/mcp/message?session={session_id}"));

    let outbound = state.outbound.clone();
    let dispatch = state.dispatch.clone();
    let cancel = session.cancellation();
    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(endpoint_event);
        let mut rx = ReceiverStream::new(rx);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                value = rx.next() => {
                    match value {
                        Some(value) => {
                            let payload = serde_json::to_string(&value)
                                .expect("JSON-RPC envelopes always serialize");
                            yield Ok(Event::default().event("message").data(payload));
                        }
                        None => break,
                    }
                }
            }
        }
        outbound.senders.remove(&session_id);
        dispatch.close_session(&session_id);
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_message(
    State(state): State<SseState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(session_id) = query.get("session").cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(protocol::error_response(
                None,
                -32600,
                "missing `session` query parameter".to_string(),
            )),
        )
            .into_response();
    };
    let Some(session) = state.dispatch.sessions().get(&session_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(protocol::error_response(
                None,
                -32600,
                format!("unknown session `{session_id}`"),
            )),
        )
            .into_response();
    };
    let Some(sender) = state.outbound.senders.get(&session_id).map(|s| s.clone()) else {
        return (
            StatusCode::GONE,
            Json(protocol::error_response(
                None,
                -32600,
                "SSE stream for this session is no longer open".to_string(),
            )),
        )
            .into_response();
    };

    let Some(msg) = protocol::parse_inbound(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(protocol::error_response(
                None,
                -32600,
                "malformed JSON-RPC message".to_string(),
            )),
        )
            .into_response();
    };

    if let Some(response) = state
        .dispatch
        .handle_request(&session, &msg.method, msg.id, msg.params)
        .await
    {
        // A client that stopped reading its SSE stream shouldn't make this
        // POST hang; the reaping of its sender below is best-effort.
        if tokio::time::timeout(SEND_TIMEOUT, sender.send(response))
            .await
            .is_err()
        {
            state.outbound.senders.remove(&session_id);
        }
    }

    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use diane_core::model::{ServerDefinition, Transport};
    use diane_storage::{Store, StoreConfig, StorePool};
    use diane_upstream::{ManagerConfig, UpstreamManager};
    use std::collections::HashMap;

    async fn test_state() -> SseState {
        let store = Arc::new(Store::new(StorePool::new(StoreConfig::in_memory()).unwrap()));
        store.ensure_default_context().unwrap();
        store
            .upsert_server(&ServerDefinition {
                name: "gh".to_string(),
                transport: Transport::Stdio {
                    command: "echo".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
                enabled: true,
                placement: None,
            })
            .unwrap();
        store
            .set_context_server(diane_storage::DEFAULT_CONTEXT_NAME, "gh", true)
            .unwrap();
        let manager = UpstreamManager::new(
            diane_builtin::BuiltinRegistry::new(),
            ManagerConfig {
                call_deadline: Duration::from_secs(1),
                backoff_initial: Duration::from_millis(10),
                backoff_max: Duration::from_millis(20),
                ready_timeout: Duration::from_millis(50),
            },
        );
        manager.seed_tools(
            "gh",
            vec![diane_core::model::ToolDescriptor {
                name: "list_repos".to_string(),
                description: String::new(),
                input_schema: serde_json::json!({}),
            }],
            false,
        );
        SseState {
            dispatch: Arc::new(Dispatch::new(store, manager)),
            outbound: OutboundChannels::default(),
        }
    }

    #[tokio::test]
    async fn message_for_unknown_session_is_rejected() {
        let state = test_state().await;
        let response = handle_message(
            State(state),
            Query(std::collections::HashMap::from([(
                "session".to_string(),
                "bogus".to_string(),
            )])),
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn message_without_session_param_is_rejected() {
        let state = test_state().await;
        let response = handle_message(
            State(state),
            Query(std::collections::HashMap::new()),
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn message_after_stream_closed_without_reopening_is_gone() {
        let state = test_state().await;
        let session = state
            .dispatch
            .create_session("s1".to_string(), diane_storage::DEFAULT_CONTEXT_NAME.to_string());
        drop(session);
        let response = handle_message(
            State(state),
            Query(std::collections::HashMap::from([(
                "session".to_string(),
                "s1".to_string(),
            )])),
            Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
