//! # Arena Server
//!
//! WebSocket front end for [`arena_core`]: a lobby arena anyone can join,
//! managed game instances players can join once started, and a management
//! API for registering, starting and stopping games.
//!
//! Clients exchange JSON frames of the form `{ "type": ..., "payload": ... }`;
//! see [`messaging`] for the full vocabulary.

pub mod api;
pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod server;
pub mod signals;

pub use api::{ApiRequest, ApiResponse, ManagementApi};
pub use cli::CliArgs;
pub use config::AppConfig;
pub use connection::ConnectionManager;
pub use dispatch::{Dispatcher, Location, Outcome, Session};
pub use error::ServerError;
pub use messaging::{ClientMessage, ServerMessage};
pub use server::ArenaServer;
