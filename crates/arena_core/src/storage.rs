//! Durable storage of resource specs.

use crate::error::{StorageError, StorageResult};
use crate::resource::{Resource, ResourceSpec};
use crate::types::ResourceId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::{debug, error, info, instrument};

/// File name of the manifest inside each resource directory.
pub const MANIFEST_FILE: &str = "game.json";

/// Sub-directories created for every registered resource.
const RESOURCE_LAYOUT: [&str; 4] = ["scripts", "modules", "assets", "config"];

/// Resource storage trait
#[async_trait]
pub trait ResourceStorage: Send + Sync + std::fmt::Debug {
    /// Persist a resource
    async fn save(&self, resource: &Resource) -> StorageResult<()>;

    /// Delete a resource and everything stored with it
    async fn delete(&self, resource_id: &ResourceId) -> StorageResult<()>;

    /// Load every stored spec. Specs come back with their id set.
    async fn load_all(&self) -> StorageResult<Vec<ResourceSpec>>;
}

/// JSON manifest storage, one directory per resource.
#[derive(Debug)]
pub struct JsonResourceStorage {
    root: PathBuf,
}

impl JsonResourceStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `resource_id`, refusing ids that would escape the root.
    fn resource_dir(&self, resource_id: &ResourceId) -> StorageResult<PathBuf> {
        if !resource_id.is_path_safe() {
            return Err(StorageError::InvalidId(resource_id.clone()));
        }
        Ok(self.root.join(resource_id.as_str()))
    }

    async fn ensure_dir(path: &Path) -> StorageResult<()> {
        tokio_fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::DirectoryCreate(path.to_path_buf(), e))
    }

    #[instrument(skip(self))]
    async fn load_manifest(&self, dir: &Path) -> StorageResult<ResourceSpec> {
        let path = dir.join(MANIFEST_FILE);
        let contents = tokio_fs::read_to_string(&path)
            .await
            .map_err(|e| StorageError::FileRead(path.clone(), e))?;

        serde_json::from_str(&contents).map_err(|e| StorageError::Deserialization(path, e))
    }
}

#[async_trait]
impl ResourceStorage for JsonResourceStorage {
    #[instrument(skip(self, resource), fields(resource_id = %resource.id))]
    async fn save(&self, resource: &Resource) -> StorageResult<()> {
        let dir = self.resource_dir(&resource.id)?;
        for sub in RESOURCE_LAYOUT {
            Self::ensure_dir(&dir.join(sub)).await?;
        }

        let path = dir.join(MANIFEST_FILE);
        let temp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(&resource.to_spec())
            .map_err(|e| StorageError::Serialization(resource.id.clone(), e))?;

        tokio_fs::write(&temp_path, json)
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;

        // Atomic rename
        tokio_fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::FileRename(temp_path, path.clone(), e))?;

        info!("💾 Saved resource manifest: {}", path.display());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, resource_id: &ResourceId) -> StorageResult<()> {
        let dir = self.resource_dir(resource_id)?;
        match tokio_fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("🗑️ Deleted resource directory: {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DirectoryDelete(dir, e)),
        }
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> StorageResult<Vec<ResourceSpec>> {
        Self::ensure_dir(&self.root).await?;

        let mut specs = Vec::new();
        let mut entries = tokio_fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::DirectoryRead(self.root.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::DirectoryRead(self.root.clone(), e))?
        {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || !path.join(MANIFEST_FILE).exists() {
                continue;
            }

            match self.load_manifest(&path).await {
                Ok(mut spec) => {
                    // The directory name wins over whatever id the manifest carries
                    spec.id = Some(ResourceId(entry.file_name().to_string_lossy().into_owned()));
                    debug!("Found stored resource in {}", path.display());
                    specs.push(spec);
                }
                Err(e) => {
                    error!("Failed to load resource from {}: {}", path.display(), e);
                    continue;
                }
            }
        }

        Ok(specs)
    }
}

/// In-process storage for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    specs: DashMap<ResourceId, ResourceSpec>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn contains(&self, resource_id: &ResourceId) -> bool {
        self.specs.contains_key(resource_id)
    }
}

#[async_trait]
impl ResourceStorage for MemoryStorage {
    async fn save(&self, resource: &Resource) -> StorageResult<()> {
        self.specs.insert(resource.id.clone(), resource.to_spec());
        Ok(())
    }

    async fn delete(&self, resource_id: &ResourceId) -> StorageResult<()> {
        self.specs.remove(resource_id);
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<ResourceSpec>> {
        Ok(self.specs.iter().map(|entry| entry.value().clone()).collect())
    }
}
