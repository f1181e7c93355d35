//! Configuration management for the arena server.
//!
//! Settings are loaded from a TOML file, then overridden by command-line
//! arguments. Every field has a default, so a partial file is valid.

use crate::cli::CliArgs;
use crate::error::ServerError;
use arena_core::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_lobby_capacity() -> usize {
    50
}

fn default_status_interval() -> u64 {
    300 // five minutes
}

fn default_games_directory() -> String {
    "games".to_string()
}

fn default_max_active_instances() -> usize {
    10
}

fn default_max_players_per_game() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network and lobby settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the WebSocket listener binds to (e.g., "127.0.0.1:8080")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum participants in the lobby arena
    #[serde(default = "default_lobby_capacity")]
    pub lobby_capacity: usize,
    /// Seconds between status log lines (0 to disable)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            lobby_capacity: default_lobby_capacity(),
            status_interval_secs: default_status_interval(),
        }
    }
}

/// Resource registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Directory holding one sub-directory per registered game
    #[serde(default = "default_games_directory")]
    pub games_directory: String,
    /// Maximum number of game instances running at once
    #[serde(default = "default_max_active_instances")]
    pub max_active_instances: usize,
    /// Participant ceiling for games that do not declare their own
    #[serde(default = "default_max_players_per_game")]
    pub max_players_per_game: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            games_directory: default_games_directory(),
            max_active_instances: default_max_active_instances(),
            max_players_per_game: default_max_players_per_game(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self, ServerError> {
        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            toml::from_str(&content)
                .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(games_dir) = &args.games_dir {
            self.registry.games_directory = games_dir.to_string_lossy().into_owned();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(max_players) = args.max_players {
            self.server.lobby_capacity = max_players;
        }
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.bind_address()?;

        if self.server.lobby_capacity == 0 {
            return Err(ServerError::Config(
                "Lobby capacity must be greater than zero".to_string(),
            ));
        }
        if self.registry.max_active_instances == 0 {
            return Err(ServerError::Config(
                "max_active_instances must be greater than zero".to_string(),
            ));
        }
        if self.registry.max_players_per_game == 0 {
            return Err(ServerError::Config(
                "max_players_per_game must be greater than zero".to_string(),
            ));
        }
        if self.registry.games_directory.is_empty() {
            return Err(ServerError::Config(
                "Games directory cannot be empty".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ServerError::Config(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ServerError> {
        self.server.bind_address.parse().map_err(|_| {
            ServerError::Config(format!("Invalid bind address: {}", self.server.bind_address))
        })
    }

    pub fn games_directory(&self) -> PathBuf {
        PathBuf::from(&self.registry.games_directory)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_active_instances: self.registry.max_active_instances,
            default_max_players: self.registry.max_players_per_game,
        }
    }
}
