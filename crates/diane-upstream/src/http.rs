//! HTTP-transport upstream client: one JSON-RPC request per call, no
//! persistent connection to supervise. Session affinity is carried the
//! same way `crucible-acp`'s HTTP-backed providers carry bearer tokens —
//! captured from the first response and replayed on every subsequent
//! request (spec.md §4.1, §8 "session header").

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use diane_core::model::ToolDescriptor;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::client::{ClientState, UpstreamClient};
use crate::error::{Result, UpstreamError};
use crate::rpc::{parse_tool_list, split_response};

const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub server: String,
    pub url: String,
    pub call_deadline: Duration,
}

pub struct HttpClient {
    config: HttpConfig,
    http: Client,
    next_id: AtomicI64,
    session_id: RwLock<Option<String>>,
    state: RwLock<ClientState>,
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(config.call_deadline)
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            next_id: AtomicI64::new(1),
            session_id: RwLock::new(None),
            state: RwLock::new(ClientState::Spawning),
            tools: RwLock::new(Vec::new()),
        }
    }

    async fn post(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self.http.post(&self.config.url).json(&body);
        if let Some(session_id) = self.session_id.read().await.clone() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::DeadlineExceeded {
                    server: self.config.server.clone(),
                }
            } else {
                UpstreamError::Transport {
                    server: self.config.server.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }

        if !response.status().is_success() {
            return Err(UpstreamError::Transport {
                server: self.config.server.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let payload: Value = response.json().await.map_err(|e| UpstreamError::Transport {
            server: self.config.server.clone(),
            message: e.to_string(),
        })?;

        split_response(payload).map_err(|(code, message)| UpstreamError::Call {
            server: self.config.server.clone(),
            code,
            message,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpClient {
    async fn initialize(&self) -> Result<()> {
        *self.state.write().await = ClientState::Initializing;
        match self
            .post("initialize", json!({"protocolVersion": "2025-03-26"}))
            .await
        {
            Ok(_) => {}
            Err(e) => {
                *self.state.write().await = ClientState::Dead;
                return Err(e);
            }
        }

        let result = match self.post("tools/list", json!({})).await {
            Ok(result) => result,
            Err(e) => {
                *self.state.write().await = ClientState::Dead;
                return Err(e);
            }
        };

        *self.tools.write().await = parse_tool_list(&result);
        *self.state.write().await = ClientState::Ready;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.tools.read().await.clone())
    }

    async fn call_tool(&self, original_name: &str, args: Value) -> Result<Value> {
        let result = self
            .post("tools/call", json!({ "name": original_name, "arguments": args }))
            .await;
        if result.is_err() {
            *self.state.write().await = ClientState::Degraded;
        }
        result
    }

    async fn shutdown(&self) {
        *self.state.write().await = ClientState::Dead;
    }

    fn state(&self) -> ClientState {
        self.state
            .try_read()
            .map(|s| *s)
            .unwrap_or(ClientState::Initializing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_against_unreachable_host_reports_transport_error() {
        let client = HttpClient::new(HttpConfig {
            server: "test".to_string(),
            url: "http://127.0.0.1:1/mcp".to_string(),
            call_deadline: Duration::from_millis(200),
        });
        let err = client.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Transport { .. } | UpstreamError::DeadlineExceeded { .. }
        ));
        assert_eq!(client.state(), ClientState::Dead);
    }
}
