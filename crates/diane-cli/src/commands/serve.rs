//! `diane stdio|http|sse|serve`: wires persistence, the upstream manager,
//! and the dispatch layer, then runs one or all three frontend transports.
//! Grounded on `crucible-cli::commands::mcp::execute`'s wire-then-block
//! shape, generalized from one stdio-only MCP server to three transports
//! a single process can run concurrently.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use diane_config::AppConfig;
use diane_hub::Hub;

use super::{new_manager, open_store};

async fn start(config: &AppConfig) -> Result<Hub> {
    let store = open_store(config)?;
    let manager = new_manager(config);
    let hub = Hub::start(store, manager, &config.host)
        .await
        .context("failed to start the hub")?;
    Ok(hub)
}

pub async fn stdio(config: &AppConfig) -> Result<()> {
    let hub = start(config).await?;
    tracing::info!("diane hub listening on stdio");
    hub.serve_stdio().await.context("stdio transport failed")?;
    hub.shutdown().await;
    Ok(())
}

pub async fn http(config: &AppConfig) -> Result<()> {
    let hub = start(config).await?;
    let addr: SocketAddr = config
        .transports
        .http_bind
        .parse()
        .context("invalid http_bind address")?;
    tracing::info!(%addr, "diane hub listening on HTTP-streamable");
    hub.serve_http(addr, config.idle_timeout())
        .await
        .context("HTTP transport failed")?;
    hub.shutdown().await;
    Ok(())
}

pub async fn sse(config: &AppConfig) -> Result<()> {
    let hub = start(config).await?;
    let addr: SocketAddr = config
        .transports
        .sse_bind
        .parse()
        .context("invalid sse_bind address")?;
    tracing::info!(%addr, "diane hub listening on SSE");
    hub.serve_sse(addr).await.context("SSE transport failed")?;
    hub.shutdown().await;
    Ok(())
}

/// Run HTTP-streamable and SSE concurrently; stdio is excluded since it
/// owns the process's own stdin/stdout and cannot share a process with
/// other long-running transports the way the two axum-based ones can.
pub async fn all(config: &AppConfig) -> Result<()> {
    let hub = start(config).await?;
    let http_addr: SocketAddr = config
        .transports
        .http_bind
        .parse()
        .context("invalid http_bind address")?;
    let sse_addr: SocketAddr = config
        .transports
        .sse_bind
        .parse()
        .context("invalid sse_bind address")?;

    tracing::info!(http = %http_addr, sse = %sse_addr, "diane hub listening");

    let idle_timeout = config.idle_timeout();
    let result = tokio::select! {
        r = hub.serve_http(http_addr, idle_timeout) => r.context("HTTP transport failed"),
        r = hub.serve_sse(sse_addr) => r.context("SSE transport failed"),
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    hub.shutdown().await;
    result
}
