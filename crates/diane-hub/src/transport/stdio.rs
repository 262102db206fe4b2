//! stdio frontend transport (spec.md §4.4): one session per process
//! lifetime, newline-terminated JSON-RPC on stdin/stdout, context resolved
//! once from `DIANE_CONTEXT` at startup. Framing mirrors
//! `crucible_acp::client`'s line-oriented `BufReader` read loop, run here
//! in the server role instead of the client role `diane_upstream::stdio`
//! plays against upstreams.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::context_resolve;
use crate::dispatch::Dispatch;
use crate::protocol;

/// Run the stdio transport to completion: blocks until stdin reaches
/// end-of-stream, then closes the session and returns.
pub async fn run(dispatch: Arc<Dispatch>) -> Result<(), diane_core::HubError> {
    let env_context = std::env::var(context_resolve::ENV_VAR).ok();
    let candidate = context_resolve::pick(None, None, env_context);
    let context = dispatch.resolve_context(candidate)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = dispatch.create_session(session_id.clone(), context);

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    // Outbound change notifications interleave with request/response lines
    // on the same stdout; both paths serialize through `stdout`'s mutex so
    // a notification never splits a response line (spec.md §5: per-session
    // ordering of outbound notifications).
    let notify_stdout = stdout.clone();
    let mut notify_rx = session
        .take_notify_receiver()
        .expect("stdio session's notify receiver taken exactly once");
    let notify_task = tokio::spawn(async move {
        while notify_rx.recv().await.is_some() {
            let line = Dispatch::notification_tools_changed();
            if write_line(&notify_stdout, &line).await.is_err() {
                return;
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let raw: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed JSON-RPC line on stdin");
                        continue;
                    }
                };
                let Some(msg) = protocol::parse_inbound(&raw) else {
                    tracing::warn!("unrecognized stdin message, skipping");
                    continue;
                };
                if let Some(response) = dispatch
                    .handle_request(&session, &msg.method, msg.id, msg.params)
                    .await
                {
                    if write_line(&stdout, &response).await.is_err() {
                        break Err(diane_core::HubError::Transport(
                            "failed to write to stdout".to_string(),
                        ));
                    }
                }
            }
            Ok(None) => break Ok(()), // stdin closed
            Err(e) => break Err(diane_core::HubError::Transport(e.to_string())),
        }
    };

    notify_task.abort();
    dispatch.close_session(&session_id);
    result
}

async fn write_line(
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    value: &serde_json::Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).expect("JSON-RPC envelopes always serialize");
    line.push('\n');
    let mut guard = stdout.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.flush().await
}
