//! Running instances of a resource.
//!
//! The registry owns at most one live [`InstanceSlot`] per resource. Callers
//! only ever see [`ResourceInstance`] snapshots taken under the resource's
//! lock, so a snapshot is never half-updated.

use crate::arena::{Arena, ArenaStats};
use crate::types::{current_timestamp, InstanceId, Participant, ParticipantId, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl InstanceStatus {
    /// Whether an instance in this status blocks another start.
    pub fn is_live(self) -> bool {
        matches!(self, InstanceStatus::Initializing | InstanceStatus::Running)
    }
}

/// Caller-supplied options for starting an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    /// Overrides the resource's participant ceiling for this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<usize>,
    /// Free-form options passed through to the loader
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// Point-in-time view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub instance_id: InstanceId,
    /// Back-reference to the owning resource
    pub resource_id: ResourceId,
    pub status: InstanceStatus,
    pub started_at: Option<u64>,
    pub max_players: usize,
    pub participants: HashMap<ParticipantId, Participant>,
    pub options: StartOptions,
    /// Failure message for instances in `Error` status
    pub error: Option<String>,
}

/// Status report of a running instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub instance_id: InstanceId,
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub status: InstanceStatus,
    pub uptime_secs: u64,
    pub players: usize,
    pub max_players: usize,
    pub stats: ArenaStats,
}

/// Registry-internal state of one instance.
pub(crate) struct InstanceSlot {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub started_at: Option<u64>,
    pub started: Option<Instant>,
    pub options: StartOptions,
    pub arena: Arc<Arena>,
    /// Slot taken from the registry-wide active-instance semaphore
    pub _permit: OwnedSemaphorePermit,
}

impl InstanceSlot {
    pub fn new(
        resource_name: &str,
        max_players: usize,
        options: StartOptions,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let instance_id = InstanceId::new();
        Self {
            instance_id,
            status: InstanceStatus::Initializing,
            started_at: None,
            started: None,
            options,
            arena: Arc::new(Arena::new(
                format!("{resource_name} [{instance_id}]"),
                max_players,
            )),
            _permit: permit,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = InstanceStatus::Running;
        self.started_at = Some(current_timestamp());
        self.started = Some(Instant::now());
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.map(|s| s.elapsed().as_secs()).unwrap_or(0)
    }

    pub async fn snapshot(&self, resource_id: &ResourceId) -> ResourceInstance {
        let participants = self
            .arena
            .list()
            .await
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        ResourceInstance {
            instance_id: self.instance_id,
            resource_id: resource_id.clone(),
            status: self.status,
            started_at: self.started_at,
            max_players: self.arena.capacity(),
            participants,
            options: self.options.clone(),
            error: None,
        }
    }

    pub async fn report(&self, resource_id: &ResourceId, resource_name: &str) -> InstanceReport {
        InstanceReport {
            instance_id: self.instance_id,
            resource_id: resource_id.clone(),
            resource_name: resource_name.to_string(),
            status: self.status,
            uptime_secs: self.uptime_secs(),
            players: self.arena.len().await,
            max_players: self.arena.capacity(),
            stats: self.arena.stats().await,
        }
    }
}

impl std::fmt::Debug for InstanceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSlot")
            .field("instance_id", &self.instance_id)
            .field("status", &self.status)
            .field("arena", &self.arena.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_statuses() {
        assert!(InstanceStatus::Initializing.is_live());
        assert!(InstanceStatus::Running.is_live());
        assert!(!InstanceStatus::Stopping.is_live());
        assert!(!InstanceStatus::Stopped.is_live());
        assert!(!InstanceStatus::Error.is_live());
    }

    #[test]
    fn test_start_options_from_json() {
        let options: StartOptions =
            serde_json::from_value(serde_json::json!({ "maxPlayers": 4, "extra": { "map": "dust" } }))
                .unwrap();
        assert_eq!(options.max_players, Some(4));
        assert_eq!(options.extra["map"], "dust");

        let empty: StartOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, StartOptions::default());
    }
}
