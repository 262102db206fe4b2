//! Builds the dispatch layer, the three frontend transports, and the
//! wiring between them (spec.md §9: "a startup function wires the
//! collaborators together; a shutdown function cancels them in reverse
//! order"). Grounded on `crucible-cli`'s `run()` entry point, which does
//! the analogous store-then-manager-then-transport wiring for a single ACP
//! session rather than three concurrent hub transports.

pub mod context_resolve;
pub mod dispatch;
pub mod filter;
pub mod protocol;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use diane_core::model::ServerDefinition;
use diane_storage::Store;
use diane_upstream::UpstreamManager;
use tokio_util::sync::CancellationToken;

pub use dispatch::Dispatch;

/// Everything started for the lifetime of one hub process. Holds the
/// cancellation token transports shut down on, not the transports
/// themselves — their `serve`/`run` futures are owned by whoever spawned
/// them (the CLI's command handlers).
pub struct Hub {
    pub dispatch: Arc<Dispatch>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Load enabled servers from `store` into `manager`, register the
    /// built-in provider, ensure a default context exists, and wire up
    /// cross-session change fan-out. Does not start any transport; callers
    /// do that with the returned `Hub`'s `dispatch` and `shutdown_token`.
    pub async fn start(
        store: Arc<Store>,
        manager: Arc<UpstreamManager>,
        host: &str,
    ) -> Result<Self, diane_core::HubError> {
        store
            .ensure_default_context()
            .map_err(|e| diane_core::HubError::Storage(e.to_string()))?;
        store
            .ensure_builtin_registered("clock")
            .map_err(|e| diane_core::HubError::Storage(e.to_string()))?;

        // Liveness is global `enabled` AND placement-enabled on this host
        // (spec.md §3); `enabled_servers` alone would load a server that's
        // been pinned off on this host.
        let live: Vec<ServerDefinition> = store
            .servers_live_on_host(host)
            .map_err(|e| diane_core::HubError::Storage(e.to_string()))?;
        // Load is non-fatal per server (spec.md §4.1/§7): a failing upstream
        // is logged and the hub keeps serving the ones that came up.
        for (server, error) in manager.load(live).await {
            tracing::warn!(server = %server, error = %error, "failed to initialize upstream at startup");
        }

        let dispatch = Arc::new(Dispatch::new(store, manager));
        dispatch.spawn_change_listener();

        Ok(Self {
            dispatch,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every session and stop the upstream manager's supervised
    /// clients, in that order (spec.md §9: sessions first so in-flight
    /// `tools/call` requests get a clean "shutting down" failure rather
    /// than the upstream vanishing out from under them).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for id in self.dispatch.sessions().ids() {
            self.dispatch.close_session(&id);
        }
        self.dispatch.manager().shutdown_all().await;
    }

    pub async fn serve_stdio(&self) -> Result<(), diane_core::HubError> {
        transport::stdio::run(self.dispatch.clone()).await
    }

    pub async fn serve_http(&self, addr: SocketAddr, idle_timeout: std::time::Duration) -> std::io::Result<()> {
        transport::http::serve(addr, self.dispatch.clone(), idle_timeout, self.shutdown.clone()).await
    }

    pub async fn serve_sse(&self, addr: SocketAddr) -> std::io::Result<()> {
        transport::sse::serve(addr, self.dispatch.clone(), self.shutdown.clone()).await
    }
}
