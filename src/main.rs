//! Main entry point for the session sync relay.
//!
//! Fans broadcasts out between websocket peers. With `SESSION_SYNC_STORE`
//! set, a headless persistence authority also records every command in that
//! JSON file and sends the full history to each new peer.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use session_sync::config::RelayConfig;
use session_sync::persistence::JsonFileSettings;
use session_sync::server::{RelayState, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env()?;

    let state = match &config.store_path {
        Some(path) => {
            info!("Persisting session history to {}", path.display());
            let settings = JsonFileSettings::open(path)?;
            RelayState::with_authority(Arc::new(settings), config.sync.clone())?
        }
        None => {
            info!("Running as a plain relay, nothing is persisted");
            RelayState::relay_only()
        }
    };
    let app = create_router(Arc::new(state));

    info!("Relay listening on http://{}", config.addr);
    info!("Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  GET  /ws     - Websocket fan-out");

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
