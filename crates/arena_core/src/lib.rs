//! # Arena Core
//!
//! Session arenas and the resource lifecycle registry behind the arena
//! server. Nothing in here knows about sockets; transports drive these types
//! and deliver whatever they return.
//!
//! ## Core Features
//!
//! - **Arenas**: Bounded, concurrent sets of participants with authoritative state
//! - **Resource Registry**: Register games, start and stop their single live instance
//! - **Atomic Startup**: Failed starts roll back completely and report the failing step
//! - **Pluggable Collaborators**: Loaders, storage and shutdown notifiers are traits
//!
//! ## Quick Start Example
//!
//! ```rust
//! use arena_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RegistryError> {
//!     let registry = ResourceRegistry::new(RegistryConfig::default());
//!
//!     let game = registry
//!         .register(ResourceSpec::named("Arena1").with_max_players(2))
//!         .await?;
//!     registry.start_instance(&game.id, StartOptions::default()).await?;
//!
//!     let player = ParticipantId::new();
//!     registry.join_instance(&game.id, player, "alice").await?;
//!
//!     registry.stop_instance(&game.id).await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod arena;
pub mod capacity;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod registry;
pub mod resource;
pub mod storage;
pub mod types;

pub use action::{PlayerAction, JUMP_HEIGHT, SCORE_INCREMENT};
pub use arena::{Arena, ArenaStats};
pub use error::{BoxError, RegistryError, RegistryResult, StartupStep, StorageError, StorageResult};
pub use instance::{InstanceReport, InstanceStatus, ResourceInstance, StartOptions};
pub use lifecycle::{FsInstanceLoader, InstanceLoader, NoopLoader, NoopNotifier, ShutdownNotifier};
pub use registry::{ActiveResource, RegistryConfig, ResourceRegistry, SHUTDOWN_REASON};
pub use resource::{Resource, ResourceSpec, ResourceStatus};
pub use storage::{JsonResourceStorage, MemoryStorage, ResourceStorage, MANIFEST_FILE};
pub use types::{
    current_timestamp, InstanceId, Participant, ParticipantId, ParticipantState, ResourceId,
    StateUpdate, Vec3, DEFAULT_HEALTH, MAX_RESOURCE_ID_LEN,
};
