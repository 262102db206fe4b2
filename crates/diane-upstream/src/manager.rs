//! Owns every upstream client for the process lifetime: spawns the right
//! client kind per `ServerDefinition`, keeps the tool registry in sync as
//! clients (re)connect, and dispatches calls by public tool name. This is
//! the seam `diane-hub` sits above — it never talks to a `StdioClient` or
//! `HttpClient` directly, only to `UpstreamManager` (spec.md §4.1, §5).

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use diane_builtin::BuiltinRegistry;
use diane_core::model::{ServerDefinition, Transport};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::builtin::BuiltinClient;
use crate::client::{ChangeEvent, ClientState, UpstreamClient};
use crate::error::{Result, UpstreamError};
use crate::http::{HttpClient, HttpConfig};
use crate::registry::{shared_registry, RegisteredTool, SharedRegistry};
use crate::sse::{SseClient, SseConfig};
use crate::stdio::{StdioClient, StdioConfig};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub call_deadline: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub ready_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            call_deadline: Duration::from_secs(60),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

struct ManagedServer {
    client: Arc<dyn UpstreamClient>,
    is_builtin: bool,
    definition: ServerDefinition,
}

pub struct UpstreamManager {
    servers: DashMap<String, ManagedServer>,
    registry: SharedRegistry,
    change_tx: broadcast::Sender<ChangeEvent>,
    builtins: BuiltinRegistry,
    config: ManagerConfig,
    /// A weak handle to itself, so background tasks spawned from `&self`
    /// methods can hold an `Arc` across an `.await` without this type
    /// needing an exotic `self: &Arc<Self>` receiver anywhere.
    self_ref: Weak<UpstreamManager>,
}

impl UpstreamManager {
    pub fn new(builtins: BuiltinRegistry, config: ManagerConfig) -> Arc<Self> {
        let (change_tx, _rx) = broadcast::channel(256);
        let manager = Arc::new_cyclic(|weak| Self {
            servers: DashMap::new(),
            registry: shared_registry(),
            change_tx,
            builtins,
            config,
            self_ref: weak.clone(),
        });
        manager.spawn_change_listener();
        manager
    }

    /// Every new server (and every client's own reconnects) feed through
    /// this one channel; one listener task keeps the registry current
    /// instead of every call site remembering to refresh it.
    fn spawn_change_listener(&self) {
        let mut rx = self.change_tx.subscribe();
        let self_ref = self.self_ref.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let Some(manager) = self_ref.upgrade() else {
                    return;
                };
                manager.refresh_registry_for(&event.server).await;
            }
        });
    }

    async fn refresh_registry_for(&self, server: &str) {
        let Some(managed) = self.servers.get(server) else {
            return;
        };
        let client = managed.client.clone();
        let is_builtin = managed.is_builtin;
        drop(managed);

        match client.list_tools().await {
            Ok(tools) => {
                self.registry.write().refresh_server(server, tools, is_builtin);
            }
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "skipped registry refresh: tools unavailable");
            }
        }
    }

    /// Construct (but do not yet initialize) the client for `definition`.
    /// Shared by `register_server` (fire-and-forget, for a single server
    /// added at runtime) and `load` (synchronous, so it can collect one
    /// error per server that fails — spec.md §4.1 `Load`).
    fn build_client(&self, definition: &ServerDefinition) -> Result<(Arc<dyn UpstreamClient>, bool)> {
        let server = definition.name.clone();
        Ok(match &definition.transport {
            Transport::Stdio { command, args, env } => (
                Arc::new(StdioClient::spawn(
                    StdioConfig {
                        server: server.clone(),
                        command: command.clone(),
                        args: args.clone(),
                        env: env.clone(),
                        call_deadline: self.config.call_deadline,
                        backoff_initial: self.config.backoff_initial,
                        backoff_max: self.config.backoff_max,
                        ready_timeout: self.config.ready_timeout,
                    },
                    self.change_tx.clone(),
                )) as Arc<dyn UpstreamClient>,
                false,
            ),
            Transport::Http { url, .. } => (
                Arc::new(HttpClient::new(HttpConfig {
                    server: server.clone(),
                    url: url.clone(),
                    call_deadline: self.config.call_deadline,
                })),
                false,
            ),
            Transport::Sse { url, .. } => (
                Arc::new(SseClient::spawn(
                    SseConfig {
                        server: server.clone(),
                        sse_url: url.clone(),
                        call_deadline: self.config.call_deadline,
                        backoff_initial: self.config.backoff_initial,
                        backoff_max: self.config.backoff_max,
                        ready_timeout: self.config.ready_timeout,
                    },
                    self.change_tx.clone(),
                )),
                false,
            ),
            Transport::Builtin => {
                let provider = self.builtins.get(&server).ok_or_else(|| {
                    UpstreamError::Configuration {
                        server: server.clone(),
                        message: "no builtin provider registered under this name".to_string(),
                    }
                })?;
                (Arc::new(BuiltinClient::new(provider)), true)
            }
        })
    }

    /// Build and register a client for `definition`, then bring it up in
    /// the background. Returns once the client is constructed, not once
    /// it's ready — callers that need readiness should await `call_tool`
    /// or `list_tools`, which block on it themselves. Used for a single
    /// server added at runtime, where there is no caller waiting on a
    /// `Vec<errors>`; `load` is used instead when that's needed.
    pub fn register_server(&self, definition: ServerDefinition) -> Result<()> {
        if !definition.enabled {
            return Ok(());
        }
        let server = definition.name.clone();
        let (client, is_builtin) = self.build_client(&definition)?;

        self.servers.insert(
            server.clone(),
            ManagedServer {
                client: client.clone(),
                is_builtin,
                definition,
            },
        );

        let self_ref = self.self_ref.clone();
        let server_name = server.clone();
        tokio::spawn(async move {
            let init_result = client.initialize().await;
            let Some(manager) = self_ref.upgrade() else {
                return;
            };
            match init_result {
                Ok(()) => manager.refresh_registry_for(&server_name).await,
                Err(e) => {
                    tracing::warn!(server = %server_name, error = %e, "upstream failed to initialize");
                }
            }
        });

        Ok(())
    }

    /// (Re)synchronize the active client set with `definitions` (spec.md
    /// §4.1 `Load`): clients for servers no longer present or no longer
    /// enabled are drained and torn down; clients for newly enabled
    /// servers are spawned and initialized. Returns one error per server
    /// that failed to initialize — non-fatal, the hub continues serving
    /// the healthy ones.
    pub async fn load(&self, definitions: Vec<ServerDefinition>) -> Vec<(String, UpstreamError)> {
        let wanted: std::collections::HashSet<String> = definitions
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.name.clone())
            .collect();

        let to_remove: Vec<String> = self
            .servers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !wanted.contains(name))
            .collect();
        for name in to_remove {
            self.remove_server(&name).await;
        }

        let mut errors = Vec::new();
        for definition in definitions {
            if !definition.enabled || self.servers.contains_key(&definition.name) {
                continue;
            }
            let server = definition.name.clone();
            let (client, is_builtin) = match self.build_client(&definition) {
                Ok(pair) => pair,
                Err(e) => {
                    errors.push((server, e));
                    continue;
                }
            };
            self.servers.insert(
                server.clone(),
                ManagedServer {
                    client: client.clone(),
                    is_builtin,
                    definition,
                },
            );
            match client.initialize().await {
                Ok(()) => self.refresh_registry_for(&server).await,
                Err(e) => errors.push((server, e)),
            }
        }
        errors
    }

    /// Tear down and re-spawn a single upstream (spec.md §4.1 `Restart`):
    /// the new client is initialized synchronously so the caller's error,
    /// if any, is the restart's own result rather than a background-task
    /// warning.
    pub async fn restart(&self, server: &str) -> Result<()> {
        let definition = self
            .servers
            .get(server)
            .map(|managed| managed.definition.clone())
            .ok_or_else(|| UpstreamError::UnknownServer(server.to_string()))?;

        self.remove_server(server).await;

        let (client, is_builtin) = self.build_client(&definition)?;
        self.servers.insert(
            server.to_string(),
            ManagedServer {
                client: client.clone(),
                is_builtin,
                definition,
            },
        );
        client.initialize().await?;
        self.refresh_registry_for(server).await;
        Ok(())
    }

    pub async fn remove_server(&self, server: &str) {
        if let Some((_, managed)) = self.servers.remove(server) {
            managed.client.shutdown().await;
        }
        self.registry.write().purge_server(server);
    }

    /// Tear down every client at process shutdown (spec.md §9: "a shutdown
    /// function cancels them in reverse order"). Runs each shutdown
    /// concurrently since clients don't depend on one another.
    pub async fn shutdown_all(&self) {
        let servers: Vec<Arc<dyn UpstreamClient>> =
            self.servers.iter().map(|entry| entry.value().client.clone()).collect();
        futures::future::join_all(servers.iter().map(|client| client.shutdown())).await;
        self.servers.clear();
    }

    pub fn list_tools(&self) -> Vec<RegisteredTool> {
        self.registry.read().list()
    }

    /// Reverse the naming rule for a public tool name without dispatching a
    /// call, so callers that only need to know the owning server (the
    /// filter engine's `may_call`, spec.md §4.3 step 1) don't pay for a
    /// round trip to the upstream.
    pub fn resolve(&self, public_name: &str) -> Option<RegisteredTool> {
        self.registry.read().resolve(public_name).cloned()
    }

    /// Seed or replace a server's tool set directly, bypassing a live
    /// client. Used by tests that don't want to stand up a real subprocess
    /// or mock HTTP server just to exercise registry-reading code above
    /// this layer (spec.md §4.2 naming rule, `diane-hub::filter` tests).
    pub fn seed_tools(&self, server: &str, tools: Vec<diane_core::model::ToolDescriptor>, is_builtin: bool) {
        self.registry.write().refresh_server(server, tools, is_builtin);
    }

    pub async fn call_tool(&self, public_name: &str, args: Value) -> Result<Value> {
        let resolved = self
            .registry
            .read()
            .resolve(public_name)
            .cloned()
            .ok_or_else(|| UpstreamError::ToolNotFound(public_name.to_string()))?;

        let client = self
            .servers
            .get(&resolved.server)
            .map(|m| m.client.clone())
            .ok_or_else(|| UpstreamError::UnknownServer(resolved.server.clone()))?;

        client.call_tool(&resolved.original_name, args).await
    }

    pub fn server_state(&self, server: &str) -> Option<ClientState> {
        self.servers.get(server).map(|m| m.client.state())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diane_core::model::PlacementHint;

    fn builtin_definition(name: &str) -> ServerDefinition {
        ServerDefinition {
            name: name.to_string(),
            transport: Transport::Builtin,
            enabled: true,
            placement: None::<PlacementHint>,
        }
    }

    #[tokio::test]
    async fn registers_builtin_and_serves_its_tools() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        manager.register_server(builtin_definition("clock")).unwrap();

        // Initialization runs in a spawned task; give it a tick to land.
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.refresh_registry_for("clock").await;

        let tools = manager.list_tools();
        assert!(tools.iter().any(|t| t.public_name == "now"));

        let result = manager.call_tool("now", Value::Null).await.unwrap();
        assert!(result.get("now").is_some());
    }

    #[tokio::test]
    async fn unknown_tool_name_is_reported() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        let err = manager.call_tool("bogus", Value::Null).await.unwrap_err();
        assert!(matches!(err, UpstreamError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn disabled_server_is_never_spawned() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        let mut definition = builtin_definition("clock");
        definition.enabled = false;
        manager.register_server(definition).unwrap();
        assert!(manager.server_state("clock").is_none());
    }

    #[tokio::test]
    async fn load_tears_down_servers_no_longer_wanted() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        let errors = manager.load(vec![builtin_definition("clock")]).await;
        assert!(errors.is_empty());
        assert!(manager.server_state("clock").is_some());

        let errors = manager.load(vec![]).await;
        assert!(errors.is_empty());
        assert!(manager.server_state("clock").is_none());
    }

    #[tokio::test]
    async fn load_reports_one_error_per_failed_server() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        // "ghost" names a builtin transport with no matching provider, so
        // `build_client` fails before a client is ever spawned.
        let errors = manager.load(vec![builtin_definition("ghost")]).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "ghost");
        assert!(manager.server_state("ghost").is_none());
    }

    #[tokio::test]
    async fn restart_rebuilds_the_same_server_from_its_stored_definition() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        manager.register_server(builtin_definition("clock")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.restart("clock").await.unwrap();
        assert!(manager.server_state("clock").is_some());

        let result = manager.call_tool("now", Value::Null).await.unwrap();
        assert!(result.get("now").is_some());
    }

    #[tokio::test]
    async fn restart_unknown_server_is_reported() {
        let manager = UpstreamManager::new(diane_builtin::default_registry(), ManagerConfig::default());
        let err = manager.restart("nope").await.unwrap_err();
        assert!(matches!(err, UpstreamError::UnknownServer(_)));
    }
}
