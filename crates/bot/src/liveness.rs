//! A tiny HTTP endpoint for uptime checks.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

pub fn router() -> Router {
    Router::new().route("/", get(|| async { "OK" }))
}

/// Serves the liveness endpoint until the listener fails.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    info!("liveness endpoint on {}", listener.local_addr()?);
    axum::serve(listener, router()).await
}
