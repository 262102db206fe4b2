//! SSE-transport upstream client. Mirrors the stdio client's supervised
//! respawn loop (spec.md §4.1) but the "process" being supervised is a
//! long-lived GET connection: it opens the event stream, waits for the
//! server's `endpoint` event to learn where to POST, then treats inbound
//! `message` events as the JSON-RPC responses/notifications a stdio
//! upstream would otherwise write to its own stdout. The half of this
//! exchange the hub runs in the other direction — hosting an SSE
//! endpoint for its own downstream clients — is grounded on
//! `crucible-acp::mcp_host`'s use of `rmcp::transport::sse_server`; no
//! equivalent client-side crate is in the dependency stack, so the
//! event-stream parsing here is done by hand over `reqwest`'s streaming
//! body, the same way `crucible-acp::client` hand-rolls its own
//! line-oriented framing instead of pulling in a protocol crate for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::{ChangeEvent, ClientState, UpstreamClient};
use crate::error::{Result, UpstreamError};
use crate::rpc::{build_request, parse_inbound, parse_tool_list, split_response, InboundMessage, PendingTable};

#[derive(Debug, Clone)]
pub struct SseConfig {
    pub server: String,
    /// URL of the `GET` event stream, e.g. `http://host:port/mcp/sse`.
    pub sse_url: String,
    pub call_deadline: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub ready_timeout: Duration,
}

struct Inner {
    state: RwLock<ClientState>,
    ready_notify: Notify,
    post_url: Mutex<Option<String>>,
    pending: PendingTable,
    tools: RwLock<Vec<ToolDescriptor>>,
    http: Client,
}

pub struct SseClient {
    config: SseConfig,
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl SseClient {
    pub fn spawn(config: SseConfig, change_tx: broadcast::Sender<ChangeEvent>) -> Self {
        let inner = Arc::new(Inner {
            state: RwLock::new(ClientState::Spawning),
            ready_notify: Notify::new(),
            post_url: Mutex::new(None),
            pending: PendingTable::new(),
            tools: RwLock::new(Vec::new()),
            http: Client::new(),
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(supervisor_loop(
            inner.clone(),
            config.clone(),
            shutdown.clone(),
            change_tx,
        ));

        Self {
            config,
            inner,
            shutdown,
        }
    }

    async fn await_ready(&self) -> Result<()> {
        if matches!(*self.inner.state.read().await, ClientState::Ready) {
            return Ok(());
        }
        let wait = self.inner.ready_notify.notified();
        tokio::select! {
            _ = wait => {}
            _ = tokio::time::sleep(self.config.ready_timeout) => {
                return Err(UpstreamError::Unavailable {
                    server: self.config.server.clone(),
                    message: "timed out waiting for SSE endpoint event".to_string(),
                });
            }
        }
        match *self.inner.state.read().await {
            ClientState::Ready => Ok(()),
            _ => Err(UpstreamError::Unavailable {
                server: self.config.server.clone(),
                message: "SSE upstream did not reach a ready state".to_string(),
            }),
        }
    }

    async fn post(&self, id: i64, method: &str, params: Value) -> std::result::Result<(), String> {
        let url = self
            .inner
            .post_url
            .lock()
            .await
            .clone()
            .ok_or("no endpoint URL received yet")?;
        let body = build_request(id, method, params);
        let response = self
            .inner
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        Ok(())
    }
}

async fn supervisor_loop(
    inner: Arc<Inner>,
    config: SseConfig,
    shutdown: CancellationToken,
    change_tx: broadcast::Sender<ChangeEvent>,
) {
    let mut backoff = config.backoff_initial;
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        *inner.state.write().await = ClientState::Spawning;
        if let Err(e) = run_once(&inner, &config, shutdown.clone(), &change_tx).await {
            tracing::warn!(server = %config.server, error = %e, "SSE upstream connection failed");
        }

        if shutdown.is_cancelled() {
            return;
        }

        *inner.state.write().await = ClientState::Dead;
        *inner.post_url.lock().await = None;
        inner.pending.fail_all();
        inner.ready_notify.notify_waiters();
        let _ = change_tx.send(ChangeEvent {
            server: config.server.clone(),
        });

        tracing::warn!(server = %config.server, backoff = ?backoff, "reconnecting SSE upstream after backoff");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(config.backoff_max);
    }
}

async fn run_once(
    inner: &Arc<Inner>,
    config: &SseConfig,
    shutdown: CancellationToken,
    change_tx: &broadcast::Sender<ChangeEvent>,
) -> std::result::Result<(), String> {
    *inner.state.write().await = ClientState::Initializing;

    let response = inner
        .http
        .get(&config.sse_url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| format!("failed to open SSE stream: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("SSE stream returned HTTP {}", response.status()));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut initialized = false;

    loop {
        tokio::select! {
            chunk = stream.next() => {
                let chunk = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => return Err(format!("SSE stream error: {e}")),
                    None => return Err("SSE stream closed".to_string()),
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let raw_event = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    let event = parse_sse_event(&raw_event);

                    match event.name.as_deref() {
                        Some("endpoint") => {
                            let url = resolve_endpoint(&config.sse_url, &event.data);
                            *inner.post_url.lock().await = Some(url);

                            if !initialized {
                                initialized = true;
                                let client = SseClient {
                                    config: config.clone(),
                                    inner: inner.clone(),
                                    shutdown: shutdown.clone(),
                                };
                                let (id, rx) = inner.pending.register();
                                client
                                    .post(id, "initialize", json!({"protocolVersion": "2025-03-26"}))
                                    .await?;
                                let response = rx.await.map_err(|_| "initialize channel closed".to_string())?;
                                split_response(response)
                                    .map_err(|(code, message)| format!("initialize error {code}: {message}"))?;

                                let (id, rx) = inner.pending.register();
                                client.post(id, "tools/list", json!({})).await?;
                                let response = rx.await.map_err(|_| "tools/list channel closed".to_string())?;
                                let result = split_response(response)
                                    .map_err(|(code, message)| format!("tools/list error {code}: {message}"))?;
                                *inner.tools.write().await = parse_tool_list(&result);

                                *inner.state.write().await = ClientState::Ready;
                                inner.ready_notify.notify_waiters();
                                let _ = change_tx.send(ChangeEvent { server: config.server.clone() });
                            }
                        }
                        Some("message") | None => {
                            if let Some(data) = &event.data {
                                if let Ok(raw) = serde_json::from_str::<Value>(data) {
                                    dispatch_message(inner, config, raw, change_tx).await;
                                }
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

async fn dispatch_message(
    inner: &Arc<Inner>,
    config: &SseConfig,
    raw: Value,
    change_tx: &broadcast::Sender<ChangeEvent>,
) {
    match parse_inbound(&raw) {
        Some(InboundMessage::Response { id, payload }) => inner.pending.complete(id, payload),
        Some(InboundMessage::Notification { method, .. }) if method == "notifications/tools/list_changed" => {
            let (id, rx) = inner.pending.register();
            let client = SseClient {
                config: config.clone(),
                inner: inner.clone(),
                shutdown: CancellationToken::new(),
            };
            if client.post(id, "tools/list", json!({})).await.is_ok() {
                if let Ok(response) = rx.await {
                    if let Ok(result) = split_response(response) {
                        *inner.tools.write().await = parse_tool_list(&result);
                    }
                }
            }
            let _ = change_tx.send(ChangeEvent {
                server: config.server.clone(),
            });
        }
        _ => {}
    }
}

struct RawSseEvent {
    name: Option<String>,
    data: Option<String>,
}

fn parse_sse_event(raw: &str) -> RawSseEvent {
    let mut name = None;
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim().to_string());
        }
    }
    RawSseEvent {
        name,
        data: if data_lines.is_empty() {
            None
        } else {
            Some(data_lines.join("\n"))
        },
    }
}

fn resolve_endpoint(sse_url: &str, data: &Option<String>) -> String {
    let endpoint = data.clone().unwrap_or_default();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint;
    }
    match reqwest::Url::parse(sse_url).and_then(|base| base.join(&endpoint)) {
        Ok(url) => url.to_string(),
        Err(_) => endpoint,
    }
}

#[async_trait]
impl UpstreamClient for SseClient {
    async fn initialize(&self) -> Result<()> {
        self.await_ready().await
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.await_ready().await?;
        Ok(self.inner.tools.read().await.clone())
    }

    async fn call_tool(&self, original_name: &str, args: Value) -> Result<Value> {
        self.await_ready().await?;
        let (id, rx) = self.inner.pending.register();
        self.post(id, "tools/call", json!({ "name": original_name, "arguments": args }))
            .await
            .map_err(|message| UpstreamError::Transport {
                server: self.config.server.clone(),
                message,
            })?;

        let response = tokio::time::timeout(self.config.call_deadline, rx)
            .await
            .map_err(|_| UpstreamError::DeadlineExceeded {
                server: self.config.server.clone(),
            })?
            .map_err(|_| UpstreamError::Unavailable {
                server: self.config.server.clone(),
                message: "connection closed while awaiting response".to_string(),
            })?;

        split_response(response).map_err(|(code, message)| UpstreamError::Call {
            server: self.config.server.clone(),
            code,
            message,
        })
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn state(&self) -> ClientState {
        self.inner
            .state
            .try_read()
            .map(|s| *s)
            .unwrap_or(ClientState::Initializing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_name_and_multiline_data() {
        let raw = "event: message\ndata: {\"jsonrpc\":\"2.0\"}";
        let event = parse_sse_event(raw);
        assert_eq!(event.name.as_deref(), Some("message"));
        assert_eq!(event.data.as_deref(), Some("{\"jsonrpc\":\"2.0\"}"));
    }

    #[test]
    fn resolves_relative_endpoint_against_sse_url() {
        let resolved = resolve_endpoint(
            "http://127.0.0.1:7338/mcp/sse",
            &Some("/mcp/sse/messages?sessionId=abc".to_string()),
        );
        assert_eq!(resolved, "http://127.0.0.1:7338/mcp/sse/messages?sessionId=abc");
    }

    #[test]
    fn absolute_endpoint_passes_through_unchanged() {
        let resolved = resolve_endpoint(
            "http://127.0.0.1:7338/mcp/sse",
            &Some("http://other-host/messages".to_string()),
        );
        assert_eq!(resolved, "http://other-host/messages");
    }
}
