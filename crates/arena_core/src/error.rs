//! Error types for the arena and resource registries.
//!
//! Every variant is recoverable by the caller. A failed mutation has either
//! fully applied or fully rolled back by the time one of these is returned.

use crate::types::{ParticipantId, ResourceId};
use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Error type produced by injected collaborators (loaders, notifiers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The startup step that was running when an instance failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    LoadLogic,
    LoadAssets,
    LoadDependencies,
    RegisterHandlers,
    /// Promotion of the started instance to running
    Activate,
}

impl std::fmt::Display for StartupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StartupStep::LoadLogic => "load logic",
            StartupStep::LoadAssets => "load assets",
            StartupStep::LoadDependencies => "load dependencies",
            StartupStep::RegisterHandlers => "register handlers",
            StartupStep::Activate => "activate",
        };
        f.write_str(name)
    }
}

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Capacity exceeded ({capacity} max)")]
    CapacityExceeded { capacity: usize },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource {0} already has an active instance")]
    AlreadyActive(ResourceId),

    #[error("Resource {0} is active and must be stopped first")]
    ResourceActive(ResourceId),

    #[error("Failed to start resource {resource_id} during {step}: {source}")]
    StartupFailed {
        resource_id: ResourceId,
        step: StartupStep,
        #[source]
        source: BoxError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub(crate) fn participant_not_found(id: ParticipantId) -> Self {
        RegistryError::NotFound {
            kind: "Participant",
            id: id.to_string(),
        }
    }

    pub(crate) fn resource_not_found(id: &ResourceId) -> Self {
        RegistryError::NotFound {
            kind: "Resource",
            id: id.to_string(),
        }
    }

    pub(crate) fn instance_not_found(id: &ResourceId) -> Self {
        RegistryError::NotFound {
            kind: "Instance",
            id: id.to_string(),
        }
    }

    /// HTTP-style status code for this error.
    ///
    /// Lookup failures are `404`, caller mistakes are `400` and collaborator
    /// failures are `500`.
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::NotFound { .. } => 404,
            RegistryError::DuplicateId(_)
            | RegistryError::CapacityExceeded { .. }
            | RegistryError::Validation(_)
            | RegistryError::AlreadyActive(_)
            | RegistryError::ResourceActive(_) => 400,
            RegistryError::StartupFailed { .. } | RegistryError::Storage(_) => 500,
        }
    }
}

/// Resource storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read directory {0}: {1}")]
    DirectoryRead(PathBuf, IoError),

    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to delete directory {0}: {1}")]
    DirectoryDelete(PathBuf, IoError),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize resource {0}: {1}")]
    Serialization(ResourceId, serde_json::Error),

    #[error("Failed to deserialize file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Resource id {0} cannot be used as a directory name")]
    InvalidId(ResourceId),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
pub type StorageResult<T> = Result<T, StorageError>;
