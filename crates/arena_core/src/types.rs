//! # Core Type Definitions
//!
//! Identifiers and participant state shared by the arena and the resource
//! registry.
//!
//! ## Key Types
//!
//! - [`ParticipantId`] - Connection identity of a participant
//! - [`ResourceId`] - Identity of a registered resource (game or package)
//! - [`InstanceId`] - Identity of one running embodiment of a resource
//! - [`Participant`] - A connected session together with its game state

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque connection identity of a participant.
///
/// The transport layer assigns one per connection; the registries never
/// interpret it beyond equality and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Creates a new random participant ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for ParticipantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a registered resource.
///
/// Resources restored from storage keep the id they were saved under (the
/// directory name), so this is a string rather than a UUID. Freshly
/// registered resources without an explicit id get a generated UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Generates a fresh random resource id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is usable as one directory name under a games root.
    ///
    /// Only ASCII letters, digits, `-` and `_` are allowed, so the id can
    /// never name a parent, an absolute path or a nested directory.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_RESOURCE_ID_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

/// Longest accepted resource id.
pub const MAX_RESOURCE_ID_LEN: usize = 128;

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a single instance run. A restarted resource gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Participant State
// ============================================================================

/// A 3D vector used for both positions and euler rotations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Health every participant starts with.
pub const DEFAULT_HEALTH: i32 = 100;

/// Mutable game state of a participant.
///
/// `position` and `rotation` follow the client; `health` and `score` are
/// server-authoritative and only change through [`crate::PlayerAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub position: Vec3,
    pub rotation: Vec3,
    pub health: i32,
    pub score: i64,
}

impl Default for ParticipantState {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            rotation: Vec3::zero(),
            health: DEFAULT_HEALTH,
            score: 0,
        }
    }
}

/// Client-supplied partial state update.
///
/// Only the transform can be set this way; health and score have no field
/// here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub position: Option<Vec3>,
    #[serde(default)]
    pub rotation: Option<Vec3>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.rotation.is_none()
    }
}

/// One connected session inside an arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub state: ParticipantState,
    /// Seconds since the Unix epoch at which the participant joined.
    pub joined_at: u64,
}

impl Participant {
    /// Creates a participant with the default spawn state.
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            state: ParticipantState::default(),
            joined_at: current_timestamp(),
        }
    }
}

/// Current time as seconds since the Unix epoch.
///
/// A clock set before 1970 yields `0` rather than panicking.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
