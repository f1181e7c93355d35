//! Collaborators invoked while an instance starts and stops.
//!
//! The registry drives the sequence; these traits do the actual work. Loaders
//! run outside of any registry lock, so they are free to touch the disk or the
//! network.

use crate::error::BoxError;
use crate::resource::Resource;
use crate::types::{InstanceId, Participant, ResourceId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Startup steps of an instance, run in declaration order.
///
/// Any step failing aborts the start; the registry rolls back and reports the
/// step that failed.
#[async_trait]
pub trait InstanceLoader: Send + Sync + std::fmt::Debug {
    /// Load the resource's game logic.
    async fn load_logic(&self, resource: &Resource) -> Result<(), BoxError>;

    /// Load the resource's assets and return their names.
    async fn load_assets(&self, resource: &Resource) -> Result<Vec<String>, BoxError>;

    /// Load the resource's declared dependencies.
    async fn load_dependencies(&self, resource: &Resource) -> Result<(), BoxError> {
        debug!("No dependency loading for {}", resource.name);
        Ok(())
    }

    /// Wire instance-specific handlers.
    async fn register_handlers(
        &self,
        _resource: &Resource,
        _instance_id: InstanceId,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Delivers shutdown notices to participants of a stopping instance.
///
/// Delivery is best effort; implementations log their own failures.
#[async_trait]
pub trait ShutdownNotifier: Send + Sync {
    async fn notify_shutdown(
        &self,
        resource_id: &ResourceId,
        participants: &[Participant],
        reason: &str,
    );
}

/// Loader that succeeds without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLoader;

#[async_trait]
impl InstanceLoader for NoopLoader {
    async fn load_logic(&self, _resource: &Resource) -> Result<(), BoxError> {
        Ok(())
    }

    async fn load_assets(&self, _resource: &Resource) -> Result<Vec<String>, BoxError> {
        Ok(Vec::new())
    }
}

/// Notifier that drops every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl ShutdownNotifier for NoopNotifier {
    async fn notify_shutdown(&self, _: &ResourceId, _: &[Participant], _: &str) {}
}

/// Loader backed by the games directory.
///
/// Expects `<games_dir>/<id>/scripts/main.lua` and reads the asset names from
/// `<games_dir>/<id>/assets/` when that directory exists.
#[derive(Debug, Clone)]
pub struct FsInstanceLoader {
    games_dir: PathBuf,
}

impl FsInstanceLoader {
    pub fn new(games_dir: impl Into<PathBuf>) -> Self {
        Self {
            games_dir: games_dir.into(),
        }
    }

    fn resource_dir(&self, resource: &Resource) -> Result<PathBuf, BoxError> {
        if !resource.id.is_path_safe() {
            return Err(format!("resource id {} cannot be used as a directory name", resource.id).into());
        }
        Ok(self.games_dir.join(resource.id.as_str()))
    }

    pub fn main_script_path(&self, resource: &Resource) -> Result<PathBuf, BoxError> {
        Ok(self.resource_dir(resource)?.join("scripts").join("main.lua"))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl InstanceLoader for FsInstanceLoader {
    async fn load_logic(&self, resource: &Resource) -> Result<(), BoxError> {
        let script = self.main_script_path(resource)?;
        let source = tokio::fs::read_to_string(&script)
            .await
            .map_err(|e| format!("main script not found at {}: {e}", script.display()))?;
        debug!("Loaded game logic for {} ({} bytes)", resource.name, source.len());
        Ok(())
    }

    async fn load_assets(&self, resource: &Resource) -> Result<Vec<String>, BoxError> {
        let assets_dir = self.resource_dir(resource)?.join("assets");
        if !is_dir(&assets_dir).await {
            return Ok(Vec::new());
        }

        let mut assets = Vec::new();
        let mut entries = tokio::fs::read_dir(&assets_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            assets.push(entry.file_name().to_string_lossy().into_owned());
        }
        assets.sort();

        debug!("{} asset(s) loaded for {}", assets.len(), resource.name);
        Ok(assets)
    }
}
