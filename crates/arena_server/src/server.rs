//! Core arena server.
//!
//! `ArenaServer` wires the lobby arena, the resource registry and the
//! connection manager together and runs the accept loop.
//!
//! # Lifecycle
//!
//! 1. Register the games found in the games directory
//! 2. Start the periodic status task
//! 3. Accept WebSocket connections until shutdown is requested
//! 4. Stop every running game instance

use crate::config::AppConfig;
use crate::connection::{handle_connection, ConnectionManager};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use arena_core::{Arena, FsInstanceLoader, JsonResourceStorage, ResourceRegistry};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

pub struct ArenaServer {
    config: AppConfig,
    registry: Arc<ResourceRegistry>,
    lobby: Arc<Arena>,
    connections: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    /// Flipped to `true` once shutdown is requested
    shutdown: watch::Sender<bool>,
}

impl ArenaServer {
    /// Creates a server backed by the configured games directory.
    pub fn new(config: AppConfig) -> Self {
        let games_dir = config.games_directory();
        let connections = Arc::new(ConnectionManager::new());

        let registry = Arc::new(
            ResourceRegistry::new(config.registry_config())
                .with_storage(Arc::new(JsonResourceStorage::new(&games_dir)))
                .with_loader(Arc::new(FsInstanceLoader::new(&games_dir)))
                .with_notifier(connections.clone()),
        );
        let lobby = Arc::new(Arena::new("lobby", config.server.lobby_capacity));
        let dispatcher = Arc::new(Dispatcher::new(lobby.clone(), registry.clone()));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            registry,
            lobby,
            connections,
            dispatcher,
            shutdown,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }

    pub fn lobby(&self) -> Arc<Arena> {
        self.lobby.clone()
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }

    /// Binds the configured address with `SO_REUSEADDR` set.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address()?;
        let domain = if address.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serves connections from `listener` until [`ArenaServer::shutdown`] is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let loaded = self.registry.load_from_storage().await?;
        info!(
            "📂 {} game(s) available from {}",
            loaded, self.config.registry.games_directory
        );

        let status_task = self.spawn_status_task();
        let mut shutdown_receiver = self.shutdown.subscribe();

        info!("🎮 Ready to accept connections on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let connections = self.connections.clone();
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, remote_addr, connections, dispatcher).await
                            {
                                error!("Connection error from {}: {}", remote_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_receiver.wait_for(|stop| *stop) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("🧹 Performing server cleanup...");
        if let Some(task) = status_task {
            task.abort();
        }

        let stopped = self.registry.stop_all().await;
        info!("✅ Server cleanup completed, {} game instance(s) stopped", stopped);
        Ok(())
    }

    /// Requests the accept loop to stop. Idempotent.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down server...");
        self.shutdown.send_replace(true);
    }

    /// Logs lobby and registry occupancy every `status_interval_secs`.
    fn spawn_status_task(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.server.status_interval_secs;
        if secs == 0 {
            info!("⏸️ Status reporting disabled");
            return None;
        }

        let lobby = self.lobby.clone();
        let registry = self.registry.clone();
        let connections = self.connections.clone();

        Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let active = registry.list_active().await;
                info!(
                    "📊 Server status: {}/{} lobby players, {} connection(s), {} game(s), {} running",
                    lobby.len().await,
                    lobby.capacity(),
                    connections.connection_count(),
                    registry.len(),
                    active.len()
                );
                for game in active {
                    info!(
                        "  🎲 {} ({}): {}/{} players, up {}s",
                        game.resource.name,
                        game.resource.id,
                        game.instance.players,
                        game.instance.max_players,
                        game.instance.uptime_secs
                    );
                }
            }
        }))
    }
}
