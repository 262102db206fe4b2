//! stdio upstream client: spawn a subprocess, speak newline-delimited
//! JSON-RPC over its stdin/stdout, and keep it alive with exponential
//! backoff (spec.md §4.1). Framing and pending-request correlation are
//! generalized from `crucible-acp::client::CrucibleAcpClient`'s child
//! process handling (piped stdio, `BufReader`, line-oriented reads),
//! extended here to support the concurrent multiplexed calls and
//! supervised respawn spec.md §4.1/§5 require.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::{ChangeEvent, ClientState, UpstreamClient};
use crate::error::{Result, UpstreamError};
use crate::rpc::{
    build_request, parse_inbound, parse_tool_list, split_response, InboundMessage, PendingTable,
};

#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub server: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub call_deadline: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Bound on how long a caller waits for the client to reach `Ready`
    /// before `initialize`/the first call gives up (spec.md §4.1 "Double
    /// initialization").
    pub ready_timeout: Duration,
}

struct Inner {
    state: RwLock<ClientState>,
    ready_notify: Notify,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingTable,
    tools: RwLock<Vec<ToolDescriptor>>,
}

pub struct StdioClient {
    config: StdioConfig,
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl StdioClient {
    /// Start the supervisor task and return immediately; the client
    /// reaches `Ready` asynchronously. `change_tx` is shared with every
    /// other client so the manager's `Subscribe` stream fans out events
    /// from all of them.
    pub fn spawn(config: StdioConfig, change_tx: broadcast::Sender<ChangeEvent>) -> Self {
        let inner = Arc::new(Inner {
            state: RwLock::new(ClientState::Spawning),
            ready_notify: Notify::new(),
            stdin: Mutex::new(None),
            pending: PendingTable::new(),
            tools: RwLock::new(Vec::new()),
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
                    message: "timed out waiting for upstream to become ready".to_string(),
                });
            }
        }
        match *self.inner.state.read().await {
            ClientState::Ready => Ok(()),
            _ => Err(UpstreamError::Unavailable {
                server: self.config.server.clone(),
                message: "upstream did not reach a ready state".to_string(),
            }),
        }
    }
}

async fn supervisor_loop(
    inner: Arc<Inner>,
    config: StdioConfig,
    shutdown: CancellationToken,
    change_tx: broadcast::Sender<ChangeEvent>,
) {
    let mut backoff = config.backoff_initial;
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        *inner.state.write().await = ClientState::Spawning;
        match run_once(&inner, &config, shutdown.clone(), &change_tx).await {
            Ok(()) => tracing::info!(server = %config.server, "stdio upstream exited"),
            Err(e) => tracing::warn!(server = %config.server, error = %e, "stdio upstream failed"),
        }

        if shutdown.is_cancelled() {
            return;
        }

        *inner.state.write().await = ClientState::Dead;
        *inner.stdin.lock().await = None;
        inner.pending.fail_all();
        inner.ready_notify.notify_waiters();
        let _ = change_tx.send(ChangeEvent {
            server: config.server.clone(),
        });

        tracing::warn!(server = %config.server, backoff = ?backoff, "respawning after backoff");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(config.backoff_max);
    }
}

/// Spawn the child, run the initialize/tools-list handshake, then pump the
/// reader loop until the child exits or shutdown is requested.
async fn run_once(
    inner: &Arc<Inner>,
    config: &StdioConfig,
    shutdown: CancellationToken,
    change_tx: &broadcast::Sender<ChangeEvent>,
) -> std::result::Result<(), String> {
    *inner.state.write().await = ClientState::Initializing;

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child: Child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;
    let stdin = child.stdin.take().ok_or("failed to capture stdin")?;
    let stdout = child.stdout.take().ok_or("failed to capture stdout")?;
    let stderr = child.stderr.take();

    *inner.stdin.lock().await = Some(stdin);

    if let Some(stderr) = stderr {
        let server = config.server.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // Child stderr never reaches the hub's own stdout/stderr
                // (that would corrupt our own stdio framing); re-emit as a
                // tagged warning instead.
                tracing::warn!(server = %server, child_stderr = %line, "upstream stderr");
            }
        });
    }

    let (id, rx) = inner.pending.register();
    send(inner, &build_request(id, "initialize", json!({"protocolVersion": "2025-03-26"}))).await?;
    let response = rx.await.map_err(|_| "initialize channel closed".to_string())?;
    split_response(response).map_err(|(code, message)| format!("initialize error {code}: {message}"))?;

    refresh_tools(inner, config).await?;

    *inner.state.write().await = ClientState::Ready;
    inner.ready_notify.notify_waiters();
    let _ = change_tx.send(ChangeEvent {
        server: config.server.clone(),
    });

    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Err(e) = handle_line(inner, config, &line, change_tx).await {
                            tracing::warn!(server = %config.server, error = %e, "failed to handle upstream line");
                        }
                    }
                    Ok(None) => return Ok(()), // stdout closed: child exited
                    Err(e) => return Err(format!("stdout read error: {e}")),
                }
            }
            _ = shutdown.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(());
            }
            status = child.wait() => {
                let status = status.map_err(|e| format!("wait failed: {e}"))?;
                return Err(format!("child exited: {status}"));
            }
        }
    }
}

async fn handle_line(
    inner: &Arc<Inner>,
    config: &StdioConfig,
    line: &str,
    change_tx: &broadcast::Sender<ChangeEvent>,
) -> std::result::Result<(), String> {
    let raw: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    match parse_inbound(&raw) {
        Some(InboundMessage::Response { id, payload }) => {
            inner.pending.complete(id, payload);
        }
        Some(InboundMessage::Notification { method, .. }) if method == "notifications/tools/list_changed" => {
            if let Err(e) = refresh_tools(inner, config).await {
                tracing::warn!(server = %config.server, error = %e, "failed to refresh tools after list_changed");
            }
            let _ = change_tx.send(ChangeEvent {
                server: config.server.clone(),
            });
        }
        Some(InboundMessage::Notification { method, .. }) => {
            tracing::debug!(server = %config.server, method = %method, "ignoring upstream notification");
        }
        None => tracing::debug!(server = %config.server, line = %line, "unrecognized upstream message"),
    }
    Ok(())
}

async fn refresh_tools(inner: &Arc<Inner>, config: &StdioConfig) -> std::result::Result<(), String> {
    let (id, rx) = inner.pending.register();
    send(inner, &build_request(id, "tools/list", json!({}))).await?;
    let response = rx.await.map_err(|_| "tools/list channel closed".to_string())?;
    let result =
        split_response(response).map_err(|(code, message)| format!("tools/list error {code}: {message}"))?;
    *inner.tools.write().await = parse_tool_list(&result);
    Ok(())
}

async fn send(inner: &Arc<Inner>, request: &Value) -> std::result::Result<(), String> {
    let mut line = serde_json::to_string(request).map_err(|e| e.to_string())?;
    line.push('\n');
    let mut guard = inner.stdin.lock().await;
    let stdin = guard.as_mut().ok_or("no stdin available")?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    stdin.flush().await.map_err(|e| e.to_string())
}

#[async_trait]
impl UpstreamClient for StdioClient {
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
        let request = build_request(
            id,
            "tools/call",
            json!({ "name": original_name, "arguments": args }),
        );
        send(&self.inner, &request)
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
        // Best-effort synchronous read: `try_read` never blocks across I/O
        // per spec.md §5, and a momentary write-lock contention just means
        // the caller sees the previous state for one tick.
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

    fn test_config(command: &str, args: &[&str]) -> StdioConfig {
        StdioConfig {
            server: "test".to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            call_deadline: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(50),
            backoff_max: Duration::from_millis(200),
            ready_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn unknown_command_eventually_reports_unavailable() {
        let (tx, _rx) = broadcast::channel(16);
        let client = StdioClient::spawn(test_config("/nonexistent/binary-xyz", &[]), tx);
        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unavailable { .. }));
    }
}
