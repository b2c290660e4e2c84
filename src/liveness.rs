use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tracing::info;

/// Body the uptime monitor expects on `GET /`.
const ALIVE_BODY: &str = "Bot is alive!";

fn router() -> Router {
    Router::new().route("/", get(|| async { ALIVE_BODY }))
}

/// Serve the liveness endpoint until the process exits. Runs as its own
/// background task so uptime checks succeed whatever the chat connection is
/// doing.
pub async fn serve(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind liveness endpoint on port {port}"))?;

    info!("Liveness endpoint listening on port {}", port);
    axum::serve(listener, router())
        .await
        .context("Liveness endpoint terminated")?;

    Ok(())
}
