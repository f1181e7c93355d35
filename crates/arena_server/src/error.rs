//! Server-level error types.

use arena_core::RegistryError;
use thiserror::Error;

/// Errors raised by the server outside of registry operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
