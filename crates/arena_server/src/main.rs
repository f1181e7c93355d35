//! Arena server entry point.
//!
//! Loads configuration, sets up logging and runs the server until SIGINT or
//! SIGTERM.

use anyhow::Context;
use arena_server::{logging::setup_logging, signals::wait_for_shutdown_signal};
use arena_server::{AppConfig, ArenaServer, CliArgs};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Configuration is loaded before logging exists
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    config.apply_cli(&args);
    config.validate().context("configuration validation failed")?;

    setup_logging(&config.logging)?;
    display_banner();

    info!("📋 Configuration Summary:");
    info!("  🌐 Bind address: {}", config.server.bind_address);
    info!("  📂 Games directory: {}", config.registry.games_directory);
    info!("  👥 Lobby capacity: {}", config.server.lobby_capacity);
    info!(
        "  🎲 Max running games: {} ({} players each by default)",
        config.registry.max_active_instances, config.registry.max_players_per_game
    );

    let server = Arc::new(ArenaServer::new(config));
    let listener = server.bind()?;

    let server_handle = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    info!("🛑 Press Ctrl+C to gracefully shutdown");
    wait_for_shutdown_signal().await?;

    info!("🛑 Shutdown signal received, initiating graceful shutdown...");
    server.shutdown();

    match server_handle.await {
        Ok(Ok(())) => info!("👋 Arena server stopped"),
        Ok(Err(e)) => error!("❌ Server error: {}", e),
        Err(e) => error!("❌ Server task failed: {}", e),
    }

    Ok(())
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║             🏟️  ARENA SERVER              ║");
    info!("║                 v{:<24}║", version);
    info!("║                                          ║");
    info!("║  🎮 Lobby + managed game instances       ║");
    info!("║  🌐 WebSocket transport                  ║");
    info!("╚══════════════════════════════════════════╝");
}
