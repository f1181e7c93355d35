//! Resource registry and instance lifecycle.
//!
//! Handles:
//! - Registration and removal of resources
//! - Starting and stopping the single live instance of a resource
//! - Admission of participants into running instances
//!
//! ## Locking
//!
//! Each resource has its own `RwLock` guarding both its record and its
//! instance slot, so status and instance always change together. The map of
//! resources is a `DashMap` whose guards are never held across an `.await`.
//!
//! A start reserves the slot under the lock (status `Initializing`), runs the
//! loader with no lock held, then re-takes the lock to commit `Running` or to
//! roll back. The reservation makes a concurrent second start fail with
//! `AlreadyActive` instead of waiting.

use crate::arena::Arena;
use crate::capacity::{slot_semaphore, try_acquire_slot};
use crate::error::{BoxError, RegistryError, RegistryResult, StartupStep};
use crate::instance::{InstanceReport, InstanceSlot, InstanceStatus, ResourceInstance, StartOptions};
use crate::lifecycle::{InstanceLoader, NoopLoader, NoopNotifier, ShutdownNotifier};
use crate::resource::{Resource, ResourceSpec, ResourceStatus};
use crate::storage::{MemoryStorage, ResourceStorage};
use crate::types::{InstanceId, Participant, ParticipantId, ResourceId};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Reason sent to participants when their instance is stopped.
pub const SHUTDOWN_REASON: &str = "Server restart";

/// Tunables of a [`ResourceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of instances initializing or running at once
    pub max_active_instances: usize,
    /// Participant ceiling for resources that do not declare one
    pub default_max_players: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active_instances: 10,
            default_max_players: 50,
        }
    }
}

/// A resource together with the status of its running instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveResource {
    pub resource: Resource,
    pub instance: InstanceReport,
}

#[derive(Debug)]
struct EntryState {
    resource: Resource,
    instance: Option<InstanceSlot>,
    last_failure: Option<ResourceInstance>,
}

#[derive(Debug)]
struct ResourceEntry {
    state: RwLock<EntryState>,
}

impl ResourceEntry {
    fn new(resource: Resource) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(EntryState {
                resource,
                instance: None,
                last_failure: None,
            }),
        })
    }

    /// Promotes the reserved slot to `Running` and the resource to `Active`.
    async fn commit(&self, instance_id: InstanceId) -> RegistryResult<ResourceInstance> {
        let mut state = self.state.write().await;
        let EntryState {
            resource,
            instance,
            last_failure,
        } = &mut *state;

        let slot = instance
            .as_mut()
            .filter(|slot| slot.instance_id == instance_id)
            .ok_or_else(|| RegistryError::StartupFailed {
                resource_id: resource.id.clone(),
                step: StartupStep::Activate,
                source: "instance reservation vanished during startup".into(),
            })?;

        slot.mark_running();
        resource.set_status(ResourceStatus::Active);
        *last_failure = None;

        info!(
            "✅ Instance {} of {} ({}) is running",
            instance_id, resource.name, resource.id
        );
        Ok(slot.snapshot(&resource.id).await)
    }

    /// Discards the reserved slot, keeping the resource's status untouched.
    async fn rollback(&self, instance_id: InstanceId, step: StartupStep, cause: &BoxError) {
        let mut state = self.state.write().await;
        let is_ours = state
            .instance
            .as_ref()
            .is_some_and(|slot| slot.instance_id == instance_id);
        if !is_ours {
            return;
        }

        if let Some(mut slot) = state.instance.take() {
            slot.status = InstanceStatus::Error;
            let mut failed = slot.snapshot(&state.resource.id).await;
            failed.error = Some(format!("{step}: {cause}"));
            state.last_failure = Some(failed);
        }

        error!(
            "❌ Failed to start {} ({}) during {}: {}",
            state.resource.name, state.resource.id, step, cause
        );
    }
}

/// Lifecycle manager for named resources and their running instances.
///
/// Construct one per process (or per test) and pass it to whatever needs it;
/// there is no global instance.
pub struct ResourceRegistry {
    config: RegistryConfig,
    resources: DashMap<ResourceId, Arc<ResourceEntry>>,
    /// Ids with a registration or removal in flight
    reserved: DashMap<ResourceId, ()>,
    active_slots: Arc<Semaphore>,
    storage: Arc<dyn ResourceStorage>,
    loader: Arc<dyn InstanceLoader>,
    notifier: Arc<dyn ShutdownNotifier>,
}

impl ResourceRegistry {
    /// Creates a registry with in-memory storage and no-op collaborators.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            resources: DashMap::new(),
            reserved: DashMap::new(),
            active_slots: slot_semaphore(config.max_active_instances),
            storage: Arc::new(MemoryStorage::new()),
            loader: Arc::new(NoopLoader),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ResourceStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn InstanceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ShutdownNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    fn entry(&self, resource_id: &ResourceId) -> Option<Arc<ResourceEntry>> {
        self.resources.get(resource_id).map(|e| e.value().clone())
    }

    fn entries(&self) -> Vec<Arc<ResourceEntry>> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Validates and registers a new resource, persisting it first.
    ///
    /// # Errors
    ///
    /// * `Validation` if the spec has no usable name
    /// * `DuplicateId` if a resource with the same id exists or is being registered
    /// * `Storage` if persisting failed (nothing is registered in that case)
    pub async fn register(&self, spec: ResourceSpec) -> RegistryResult<Resource> {
        let resource = Resource::from_spec(spec)?;
        let id = resource.id.clone();

        // Reserve before checking so a registration finishing concurrently is seen
        if self.reserved.insert(id.clone(), ()).is_some() {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        if self.resources.contains_key(&id) {
            self.reserved.remove(&id);
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        if let Err(e) = self.storage.save(&resource).await {
            self.reserved.remove(&id);
            error!("Failed to persist resource {}: {}", id, e);
            return Err(e.into());
        }

        self.resources.insert(id.clone(), ResourceEntry::new(resource.clone()));
        self.reserved.remove(&id);

        info!("📋 Registered resource: {} ({})", resource.name, id);
        Ok(resource)
    }

    /// Removes a resource that is not active.
    ///
    /// Returns `Ok(false)` if no such resource exists.
    ///
    /// # Errors
    ///
    /// * `ResourceActive` if the resource has a live instance
    /// * `Storage` if deleting its stored data failed (the resource stays registered)
    pub async fn unregister(&self, resource_id: &ResourceId) -> RegistryResult<bool> {
        let Some(entry) = self.entry(resource_id) else {
            return Ok(false);
        };

        let previous = {
            let mut state = entry.state.write().await;
            if state.resource.status == ResourceStatus::Removed {
                return Ok(false);
            }
            let live = state.instance.as_ref().is_some_and(|s| s.status.is_live());
            if live || state.resource.is_active() {
                return Err(RegistryError::ResourceActive(resource_id.clone()));
            }
            let previous = state.resource.status;
            state.resource.set_status(ResourceStatus::Removed);
            previous
        };

        self.reserved.insert(resource_id.clone(), ());
        let deleted = self.storage.delete(resource_id).await;

        let result = match deleted {
            Ok(()) => {
                self.resources.remove(resource_id);
                info!("🗑️ Unregistered resource {}", resource_id);
                Ok(true)
            }
            Err(e) => {
                entry.state.write().await.resource.set_status(previous);
                error!("Failed to delete stored data of {}: {}", resource_id, e);
                Err(e.into())
            }
        };
        self.reserved.remove(resource_id);
        result
    }

    /// Registers every spec found in storage without writing them back.
    ///
    /// Invalid or duplicate specs are logged and skipped. Returns how many
    /// resources were added.
    pub async fn load_from_storage(&self) -> RegistryResult<usize> {
        let specs = self.storage.load_all().await?;
        let mut loaded = 0;

        for spec in specs {
            let resource = match Resource::from_spec(spec) {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("Skipping stored resource: {}", e);
                    continue;
                }
            };

            if self.resources.contains_key(&resource.id) {
                warn!("Skipping stored resource {}: already registered", resource.id);
                continue;
            }

            debug!("Loaded resource {} ({})", resource.name, resource.id);
            self.resources
                .insert(resource.id.clone(), ResourceEntry::new(resource));
            loaded += 1;
        }

        info!("📦 {} resource(s) loaded from storage", loaded);
        Ok(loaded)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get(&self, resource_id: &ResourceId) -> Option<Resource> {
        let entry = self.entry(resource_id)?;
        let state = entry.state.read().await;
        (state.resource.status != ResourceStatus::Removed).then(|| state.resource.clone())
    }

    /// Every registered resource, sorted by name.
    pub async fn list(&self) -> Vec<Resource> {
        let mut resources = Vec::new();
        for entry in self.entries() {
            let state = entry.state.read().await;
            if state.resource.status != ResourceStatus::Removed {
                resources.push(state.resource.clone());
            }
        }
        resources.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        resources
    }

    pub async fn is_active(&self, resource_id: &ResourceId) -> bool {
        match self.entry(resource_id) {
            Some(entry) => entry.state.read().await.resource.is_active(),
            None => false,
        }
    }

    /// Snapshot of the resource's current instance, if it has one.
    pub async fn get_instance(&self, resource_id: &ResourceId) -> Option<ResourceInstance> {
        let entry = self.entry(resource_id)?;
        let state = entry.state.read().await;
        match &state.instance {
            Some(slot) => Some(slot.snapshot(&state.resource.id).await),
            None => None,
        }
    }

    /// Status report of the resource's running instance.
    pub async fn instance_report(&self, resource_id: &ResourceId) -> Option<InstanceReport> {
        let entry = self.entry(resource_id)?;
        let state = entry.state.read().await;
        match &state.instance {
            Some(slot) if slot.status == InstanceStatus::Running => {
                Some(slot.report(&state.resource.id, &state.resource.name).await)
            }
            _ => None,
        }
    }

    /// The most recent failed start of this resource, if any.
    pub async fn last_failure(&self, resource_id: &ResourceId) -> Option<ResourceInstance> {
        let entry = self.entry(resource_id)?;
        let state = entry.state.read().await;
        state.last_failure.clone()
    }

    /// Every active resource joined with its instance status.
    pub async fn list_active(&self) -> Vec<ActiveResource> {
        let mut active = Vec::new();
        for entry in self.entries() {
            let state = entry.state.read().await;
            if let Some(slot) = &state.instance {
                if slot.status == InstanceStatus::Running {
                    active.push(ActiveResource {
                        resource: state.resource.clone(),
                        instance: slot.report(&state.resource.id, &state.resource.name).await,
                    });
                }
            }
        }
        active.sort_by(|a, b| a.resource.name.cmp(&b.resource.name));
        active
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of instances currently initializing or running.
    pub fn live_instances(&self) -> usize {
        self.config
            .max_active_instances
            .min(Semaphore::MAX_PERMITS)
            .saturating_sub(self.active_slots.available_permits())
    }

    // ------------------------------------------------------------------------
    // Instance lifecycle
    // ------------------------------------------------------------------------

    /// Starts the single instance of a resource.
    ///
    /// The instance is reserved as `Initializing`, the loader steps run without
    /// any lock held, and only when all of them succeed does the instance turn
    /// `Running` and the resource `Active`. On failure the reservation is
    /// discarded, the resource keeps its previous status, and the failed
    /// instance is kept for [`ResourceRegistry::last_failure`].
    ///
    /// The startup runs on its own task, so dropping the returned future does
    /// not leave a dangling reservation behind.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the resource does not exist
    /// * `AlreadyActive` if an instance is initializing or running
    /// * `CapacityExceeded` if the registry-wide instance limit is reached
    /// * `Validation` if the options request a zero participant ceiling
    /// * `StartupFailed` if a loader step failed or panicked
    pub async fn start_instance(
        &self,
        resource_id: &ResourceId,
        options: StartOptions,
    ) -> RegistryResult<ResourceInstance> {
        let entry = self
            .entry(resource_id)
            .ok_or_else(|| RegistryError::resource_not_found(resource_id))?;

        let (resource, instance_id) = {
            let mut state = entry.state.write().await;
            if state.resource.status == ResourceStatus::Removed {
                return Err(RegistryError::resource_not_found(resource_id));
            }
            if state.instance.as_ref().is_some_and(|s| s.status.is_live()) {
                return Err(RegistryError::AlreadyActive(resource_id.clone()));
            }

            let max_players = options
                .max_players
                .or(state.resource.max_players)
                .unwrap_or(self.config.default_max_players);
            if max_players == 0 {
                return Err(RegistryError::Validation(
                    "maxPlayers must be greater than zero".to_string(),
                ));
            }

            let permit =
                try_acquire_slot(&self.active_slots, self.config.max_active_instances)?;
            let slot = InstanceSlot::new(&state.resource.name, max_players, options, permit);
            let instance_id = slot.instance_id;
            state.instance = Some(slot);
            (state.resource.clone(), instance_id)
        };

        info!(
            "🚀 Starting instance {} of {} ({})",
            instance_id, resource.name, resource.id
        );

        let loader = self.loader.clone();
        let task_entry = entry.clone();
        let startup = tokio::spawn(async move {
            match run_startup(loader.as_ref(), &resource, instance_id).await {
                Ok(assets) => {
                    debug!("{} asset(s) ready for {}", assets.len(), resource.name);
                    task_entry.commit(instance_id).await
                }
                Err((step, source)) => {
                    task_entry.rollback(instance_id, step, &source).await;
                    Err(RegistryError::StartupFailed {
                        resource_id: resource.id.clone(),
                        step,
                        source,
                    })
                }
            }
        });

        match startup.await {
            Ok(result) => result,
            Err(join_error) => {
                let source: BoxError = format!("startup task aborted: {join_error}").into();
                entry.rollback(instance_id, StartupStep::Activate, &source).await;
                Err(RegistryError::StartupFailed {
                    resource_id: resource_id.clone(),
                    step: StartupStep::Activate,
                    source,
                })
            }
        }
    }

    /// Stops the running instance of a resource.
    ///
    /// Participants are removed and handed to the shutdown notifier, and the
    /// resource goes back to `Registered`. Returns `Ok(false)` when there is no
    /// running instance (already stopped, never started, or still
    /// initializing).
    ///
    /// # Errors
    ///
    /// * `NotFound` if the resource does not exist
    pub async fn stop_instance(&self, resource_id: &ResourceId) -> RegistryResult<bool> {
        let entry = self
            .entry(resource_id)
            .ok_or_else(|| RegistryError::resource_not_found(resource_id))?;

        let (mut slot, participants, name) = {
            let mut state = entry.state.write().await;
            let mut slot = match state.instance.take() {
                Some(slot) if slot.status == InstanceStatus::Running => slot,
                other => {
                    state.instance = other;
                    return Ok(false);
                }
            };

            slot.status = InstanceStatus::Stopping;
            let participants = slot.arena.drain().await;
            state.resource.set_status(ResourceStatus::Registered);
            (slot, participants, state.resource.name.clone())
        };

        if !participants.is_empty() {
            self.notifier
                .notify_shutdown(resource_id, &participants, SHUTDOWN_REASON)
                .await;
        }

        slot.status = InstanceStatus::Stopped;
        info!(
            "🛑 Stopped instance {} of {} ({}), {} participant(s) notified",
            slot.instance_id,
            name,
            resource_id,
            participants.len()
        );
        Ok(true)
    }

    /// Stops every running instance. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<ResourceId> = self.resources.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for id in ids {
            match self.stop_instance(&id).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to stop {}: {}", id, e),
            }
        }
        stopped
    }

    // ------------------------------------------------------------------------
    // Participants of running instances
    // ------------------------------------------------------------------------

    /// Admits a participant into the running instance of a resource.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the resource or its running instance does not exist
    /// * Any error of [`Arena::join`]
    pub async fn join_instance(
        &self,
        resource_id: &ResourceId,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
    ) -> RegistryResult<Participant> {
        let entry = self
            .entry(resource_id)
            .ok_or_else(|| RegistryError::resource_not_found(resource_id))?;

        // Held across the join so a concurrent stop cannot drain in between
        let state = entry.state.read().await;
        let slot = state
            .instance
            .as_ref()
            .filter(|slot| slot.status == InstanceStatus::Running)
            .ok_or_else(|| RegistryError::instance_not_found(resource_id))?;

        slot.arena.join(participant_id, display_name).await
    }

    /// Removes a participant from the running instance of a resource.
    pub async fn leave_instance(
        &self,
        resource_id: &ResourceId,
        participant_id: ParticipantId,
    ) -> bool {
        let Some(entry) = self.entry(resource_id) else {
            return false;
        };
        let state = entry.state.read().await;
        match &state.instance {
            Some(slot) => slot.arena.leave(participant_id).await,
            None => false,
        }
    }

    /// The arena of a resource's running instance.
    pub async fn arena(&self, resource_id: &ResourceId) -> Option<Arc<Arena>> {
        let entry = self.entry(resource_id)?;
        let state = entry.state.read().await;
        state
            .instance
            .as_ref()
            .filter(|slot| slot.status == InstanceStatus::Running)
            .map(|slot| slot.arena.clone())
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("config", &self.config)
            .field("resources", &self.resources.len())
            .field("live_instances", &self.live_instances())
            .finish()
    }
}

/// Runs the loader steps in order, converting errors and panics into the
/// failing step plus its cause.
async fn run_startup(
    loader: &dyn InstanceLoader,
    resource: &Resource,
    instance_id: InstanceId,
) -> Result<Vec<String>, (StartupStep, BoxError)> {
    guarded(StartupStep::LoadLogic, loader.load_logic(resource)).await?;
    let assets = guarded(StartupStep::LoadAssets, loader.load_assets(resource)).await?;
    guarded(StartupStep::LoadDependencies, loader.load_dependencies(resource)).await?;
    guarded(
        StartupStep::RegisterHandlers,
        loader.register_handlers(resource, instance_id),
    )
    .await?;
    Ok(assets)
}

async fn guarded<T>(
    step: StartupStep,
    fut: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, (StartupStep, BoxError)> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err((step, e)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err((step, format!("panicked: {message}").into()))
        }
    }
}
