//! Dice Dungeon Host
//!
//! Headless authoritative host. Peers connect over WebSocket; the first to
//! join takes the host seat and may start the game.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dice_dungeon::{
    network::{host::run_websocket_host, snapshot_tag, HostConfig},
    SystemClock, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HostConfig::from_env();
    info!("Dice Dungeon host v{}", VERSION);
    info!(
        "Session {} on {} (tick {:?}, draft {})",
        config.host_name,
        config.bind_addr,
        config.tick_interval,
        if config.game.draft_enabled { "on" } else { "off" }
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let ctrl_c = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => {
                warn!("Could not listen for Ctrl-C: {}", e);
                return;
            }
        }
        let _ = ctrl_c.send(());
    });

    let final_state = run_websocket_host(config, Arc::new(SystemClock), shutdown_tx).await?;
    info!(
        "Session closed: {:?}, {} players, state {}",
        final_state.status,
        final_state.players.len(),
        snapshot_tag(&final_state)
    );
    Ok(())
}
