//! Integration tests for the resource lifecycle
//!
//! These tests drive the public registry API the way the server does:
//! register, start, admit participants, stop, and check what the
//! collaborators observed along the way.

use arena_core::*;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Notifier that records every shutdown notice it receives
#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(ResourceId, Vec<ParticipantId>, String)>>,
}

impl RecordingNotifier {
    fn notices(&self) -> Vec<(ResourceId, Vec<ParticipantId>, String)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShutdownNotifier for RecordingNotifier {
    async fn notify_shutdown(
        &self,
        resource_id: &ResourceId,
        participants: &[Participant],
        reason: &str,
    ) {
        let mut ids: Vec<ParticipantId> = participants.iter().map(|p| p.id).collect();
        ids.sort_by_key(|id| id.0);
        self.notices
            .lock()
            .unwrap()
            .push((resource_id.clone(), ids, reason.to_string()));
    }
}

/// Loader that records the steps it ran and can fail at one of them
#[derive(Debug, Default)]
struct ScriptedLoader {
    fail_at: Option<StartupStep>,
    delay: Option<Duration>,
    steps: Mutex<Vec<StartupStep>>,
}

impl ScriptedLoader {
    fn record(&self, step: StartupStep) -> Result<(), BoxError> {
        self.steps.lock().unwrap().push(step);
        if self.fail_at == Some(step) {
            return Err(format!("{step} failed").into());
        }
        Ok(())
    }

    fn steps(&self) -> Vec<StartupStep> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl InstanceLoader for ScriptedLoader {
    async fn load_logic(&self, _: &Resource) -> Result<(), BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record(StartupStep::LoadLogic)
    }

    async fn load_assets(&self, _: &Resource) -> Result<Vec<String>, BoxError> {
        self.record(StartupStep::LoadAssets)?;
        Ok(vec!["terrain.bin".to_string()])
    }

    async fn load_dependencies(&self, _: &Resource) -> Result<(), BoxError> {
        self.record(StartupStep::LoadDependencies)
    }

    async fn register_handlers(&self, _: &Resource, _: InstanceId) -> Result<(), BoxError> {
        self.record(StartupStep::RegisterHandlers)
    }
}

#[tokio::test]
async fn test_arena_capacity_and_shutdown_notices() {
    let notifier = Arc::new(RecordingNotifier::default());
    let registry =
        ResourceRegistry::new(RegistryConfig::default()).with_notifier(notifier.clone());

    let game = registry
        .register(ResourceSpec::named("Arena1").with_max_players(2))
        .await
        .unwrap();
    registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap();

    let (a, b, c) = (ParticipantId::new(), ParticipantId::new(), ParticipantId::new());
    registry.join_instance(&game.id, a, "A").await.unwrap();
    registry.join_instance(&game.id, b, "B").await.unwrap();

    let full = registry.join_instance(&game.id, c, "C").await;
    assert!(matches!(
        full,
        Err(RegistryError::CapacityExceeded { capacity: 2 })
    ));

    assert!(registry.leave_instance(&game.id, a).await);
    registry.join_instance(&game.id, c, "C").await.unwrap();

    let report = registry.instance_report(&game.id).await.unwrap();
    assert_eq!(report.players, 2);
    assert_eq!(report.stats.sessions, 3);
    assert_eq!(report.stats.peak_players, 2);

    assert!(registry.stop_instance(&game.id).await.unwrap());

    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    let (resource_id, notified, reason) = &notices[0];
    assert_eq!(resource_id, &game.id);
    let mut expected = vec![b, c];
    expected.sort_by_key(|id| id.0);
    assert_eq!(notified, &expected);
    assert_eq!(reason, SHUTDOWN_REASON);

    assert!(registry.arena(&game.id).await.is_none());
    assert!(!registry.is_active(&game.id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let loader = Arc::new(ScriptedLoader {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let registry = Arc::new(ResourceRegistry::new(RegistryConfig::default()).with_loader(loader));
    let game = registry.register(ResourceSpec::named("Race")).await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let registry = registry.clone();
            let id = game.id.clone();
            tokio::spawn(async move { registry.start_instance(&id, StartOptions::default()).await })
        })
        .collect();

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(instance) => {
                assert_eq!(instance.status, InstanceStatus::Running);
                started += 1;
            }
            Err(RegistryError::AlreadyActive(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(rejected, 1);
    assert_eq!(registry.live_instances(), 1);
    assert_eq!(registry.list_active().await.len(), 1);
}

#[tokio::test]
async fn test_failed_start_rolls_back_completely() {
    let loader = Arc::new(ScriptedLoader {
        fail_at: Some(StartupStep::LoadDependencies),
        ..Default::default()
    });
    let registry = ResourceRegistry::new(RegistryConfig::default()).with_loader(loader.clone());
    let game = registry.register(ResourceSpec::named("Fragile")).await.unwrap();

    let err = registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::StartupFailed {
            step: StartupStep::LoadDependencies,
            ..
        }
    ));
    assert_eq!(err.status_code(), 500);

    // Steps after the failing one never ran
    assert_eq!(
        loader.steps(),
        vec![
            StartupStep::LoadLogic,
            StartupStep::LoadAssets,
            StartupStep::LoadDependencies
        ]
    );

    assert_eq!(
        registry.get(&game.id).await.unwrap().status,
        ResourceStatus::Registered
    );
    assert!(registry.get_instance(&game.id).await.is_none());
    assert!(registry.list_active().await.is_empty());
    assert_eq!(registry.live_instances(), 0);

    let failure = registry.last_failure(&game.id).await.unwrap();
    assert_eq!(failure.status, InstanceStatus::Error);
    assert!(failure
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("load dependencies"));

    // Nothing is left running to join
    let join = registry
        .join_instance(&game.id, ParticipantId::new(), "late")
        .await;
    assert!(matches!(join, Err(RegistryError::NotFound { .. })));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let registry = ResourceRegistry::new(RegistryConfig::default());
    let game = registry.register(ResourceSpec::named("Once")).await.unwrap();

    assert!(!registry.stop_instance(&game.id).await.unwrap());

    registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap();
    assert!(registry.stop_instance(&game.id).await.unwrap());
    assert!(!registry.stop_instance(&game.id).await.unwrap());
    assert!(!registry.stop_instance(&game.id).await.unwrap());

    let unknown = registry.stop_instance(&"nope".into()).await;
    assert!(matches!(unknown, Err(RegistryError::NotFound { .. })));
}

#[tokio::test]
async fn test_operations_before_register_are_not_found() {
    let registry = ResourceRegistry::new(RegistryConfig::default());
    let id = ResourceId::from("ghost");

    let start = registry.start_instance(&id, StartOptions::default()).await;
    assert!(matches!(start, Err(RegistryError::NotFound { .. })));
    assert_eq!(start.unwrap_err().status_code(), 404);

    assert!(registry.get(&id).await.is_none());
    assert!(registry.get_instance(&id).await.is_none());
    assert!(!registry.unregister(&id).await.unwrap());
    assert!(!registry.leave_instance(&id, ParticipantId::new()).await);
}

#[tokio::test]
async fn test_unregister_active_resource_is_rejected() {
    let registry = ResourceRegistry::new(RegistryConfig::default());
    let game = registry.register(ResourceSpec::named("Busy")).await.unwrap();
    registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap();

    let err = registry.unregister(&game.id).await.unwrap_err();
    assert!(matches!(err, RegistryError::ResourceActive(_)));
    assert_eq!(err.status_code(), 400);
    assert!(registry.is_active(&game.id).await);

    registry.stop_instance(&game.id).await.unwrap();
    assert!(registry.unregister(&game.id).await.unwrap());
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn test_games_directory_round_trip() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(JsonResourceStorage::new(dir.path()));
    let loader = Arc::new(FsInstanceLoader::new(dir.path()));

    let registry = ResourceRegistry::new(RegistryConfig::default())
        .with_storage(storage.clone())
        .with_loader(loader.clone());
    let game = registry
        .register(ResourceSpec::named("Dungeon").with_id("dungeon"))
        .await
        .unwrap();
    assert!(dir.path().join("dungeon").join(MANIFEST_FILE).exists());

    // No main script yet
    let missing = registry
        .start_instance(&game.id, StartOptions::default())
        .await;
    assert!(matches!(
        missing,
        Err(RegistryError::StartupFailed {
            step: StartupStep::LoadLogic,
            ..
        })
    ));

    std::fs::write(loader.main_script_path(&game).unwrap(), "-- entry point").unwrap();
    registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap();
    registry.stop_instance(&game.id).await.unwrap();

    let restarted = ResourceRegistry::new(RegistryConfig::default())
        .with_storage(storage)
        .with_loader(loader);
    assert_eq!(restarted.load_from_storage().await.unwrap(), 1);
    let reloaded = restarted.get(&game.id).await.unwrap();
    assert_eq!(reloaded.name, "Dungeon");
    assert_eq!(reloaded.status, ResourceStatus::Registered);

    assert!(restarted.unregister(&game.id).await.unwrap());
    assert!(!dir.path().join("dungeon").exists());
}

#[tokio::test]
async fn test_resource_ids_cannot_escape_games_directory() {
    let dir = TempDir::new().unwrap();
    let games = dir.path().join("games");
    let victim = dir.path().join("victim");
    std::fs::create_dir_all(&victim).unwrap();
    std::fs::write(victim.join("precious.txt"), "keep").unwrap();

    let registry = ResourceRegistry::new(RegistryConfig::default())
        .with_storage(Arc::new(JsonResourceStorage::new(&games)))
        .with_loader(Arc::new(FsInstanceLoader::new(&games)));

    let absolute = victim.to_string_lossy().into_owned();
    for id in ["../victim", absolute.as_str(), "nested/dir", ".."] {
        let result = registry
            .register(ResourceSpec::named("Escape").with_id(id))
            .await;
        assert!(
            matches!(result, Err(RegistryError::Validation(_))),
            "registered {id:?}"
        );

        let id = ResourceId::from(id);
        assert!(!registry.unregister(&id).await.unwrap());
        assert!(matches!(
            registry.start_instance(&id, StartOptions::default()).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    assert!(registry.is_empty());
    assert!(victim.join("precious.txt").exists());
    assert!(!victim.join(MANIFEST_FILE).exists());
    assert!(!victim.join("scripts").exists());
}

/// Memory storage whose writes and deletes can be made to fail
#[derive(Debug, Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_save: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl ResourceStorage for FlakyStorage {
    async fn save(&self, resource: &Resource) -> StorageResult<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StorageError::FileWrite(
                PathBuf::from(resource.id.as_str()),
                std::io::Error::other("disk full"),
            ));
        }
        self.inner.save(resource).await
    }

    async fn delete(&self, resource_id: &ResourceId) -> StorageResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::DirectoryDelete(
                PathBuf::from(resource_id.as_str()),
                std::io::Error::other("permission denied"),
            ));
        }
        self.inner.delete(resource_id).await
    }

    async fn load_all(&self) -> StorageResult<Vec<ResourceSpec>> {
        self.inner.load_all().await
    }
}

#[tokio::test]
async fn test_failed_register_leaves_nothing_behind() {
    let storage = Arc::new(FlakyStorage::default());
    let registry = ResourceRegistry::new(RegistryConfig::default()).with_storage(storage.clone());
    let id = ResourceId::from("arena-1");

    storage.fail_save.store(true, Ordering::SeqCst);
    let failed = registry
        .register(ResourceSpec::named("Arena1").with_id("arena-1"))
        .await;
    assert!(matches!(failed, Err(RegistryError::Storage(_))));
    assert!(registry.get(&id).await.is_none());
    assert!(registry.list().await.is_empty());
    assert!(!storage.inner.contains(&id));

    // The id is free again once storage recovers
    storage.fail_save.store(false, Ordering::SeqCst);
    let game = registry
        .register(ResourceSpec::named("Arena1").with_id("arena-1"))
        .await
        .unwrap();
    assert_eq!(game.id, id);
    assert!(storage.inner.contains(&id));
}

#[tokio::test]
async fn test_failed_unregister_restores_resource() {
    let storage = Arc::new(FlakyStorage::default());
    let registry = ResourceRegistry::new(RegistryConfig::default()).with_storage(storage.clone());
    let game = registry
        .register(ResourceSpec::named("Arena1").with_id("arena-1"))
        .await
        .unwrap();

    storage.fail_delete.store(true, Ordering::SeqCst);
    let failed = registry.unregister(&game.id).await;
    assert!(matches!(failed, Err(RegistryError::Storage(_))));

    let kept = registry.get(&game.id).await.unwrap();
    assert_eq!(kept.status, ResourceStatus::Registered);
    assert_eq!(registry.list().await.len(), 1);

    // Still fully usable
    registry
        .start_instance(&game.id, StartOptions::default())
        .await
        .unwrap();
    assert!(registry.is_active(&game.id).await);
    assert!(registry.stop_instance(&game.id).await.unwrap());

    storage.fail_delete.store(false, Ordering::SeqCst);
    assert!(registry.unregister(&game.id).await.unwrap());
    assert!(registry.get(&game.id).await.is_none());
}
