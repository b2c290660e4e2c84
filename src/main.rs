mod apod;
mod bot;
mod config;
mod liveness;
mod message;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,apodbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing secret aborts before anything connects
    let config = Config::from_env().context("Startup configuration error")?;

    info!("Configuration loaded");
    info!("  NASA API: {}", config.nasa.base_url);
    info!("  Liveness port: {}", config.liveness.port);
    match config.telegram.home_chat {
        Some(id) => info!("  Home chat: {}", id),
        None => info!("  Home chat: unrestricted"),
    }

    // The liveness endpoint comes up first and stays up whatever happens to
    // the chat connection.
    let liveness_port = config.liveness.port;
    tokio::spawn(async move {
        if let Err(e) = liveness::serve(liveness_port).await {
            error!("Liveness endpoint failed: {:#}", e);
        }
    });

    info!("Bot is starting...");
    supervise_connection(&config).await
}

/// Keep the chat connection alive: linear backoff between attempts, a fixed
/// attempt cap, and after the cap only the liveness endpoint remains.
async fn supervise_connection(config: &Config) -> Result<()> {
    let max_attempts = config.connection.max_attempts;

    for attempt in 1..=max_attempts {
        match bot::run(config).await {
            Ok(()) => {
                // The dispatcher only returns on a shutdown signal.
                info!("Chat connection closed, shutting down");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Chat connection failed (attempt {}/{}): {:#}",
                    attempt, max_attempts, e
                );
                if attempt < max_attempts {
                    let delay = config.connection.base_delay * attempt;
                    info!("Retrying in {}s", delay.as_secs());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    error!("Chat connection is permanently down; liveness endpoint keeps running");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Interrupt received, shutting down");
    Ok(())
}
