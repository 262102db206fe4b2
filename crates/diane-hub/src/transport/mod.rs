//! The three frontend transports (spec.md §4.4): one session per process
//! for stdio, many concurrent sessions sharing one `Dispatch` for
//! HTTP-streamable and SSE. Each module only translates its own framing
//! into `Dispatch::handle_request` calls; none of them know about the
//! filter engine, the registry, or persistence directly.

pub mod http;
pub mod sse;
pub mod stdio;

/// `GET /health` (spec.md §6), shared by the HTTP-streamable and SSE
/// routers since both bind an axum server.
pub fn health_router() -> axum::Router {
    axum::Router::new().route("/health", axum::routing::get(health))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
