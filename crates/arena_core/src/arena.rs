//! Session registry for one bounded arena of connected participants.
//!
//! An [`Arena`] performs admission control and tracks participant state. It
//! never talks to the network: callers receive the mutated [`Participant`] and
//! decide who to notify.
//!
//! ## Concurrency
//!
//! All state lives behind a single `RwLock`. Mutations take the write half, so
//! the capacity check and the insert of `join` are one atomic step; readers
//! share the read half and always see a complete snapshot.

use crate::action::PlayerAction;
use crate::capacity::ensure_room;
use crate::error::{RegistryError, RegistryResult};
use crate::types::{Participant, ParticipantId, StateUpdate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lifetime counters of an arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Number of successful joins.
    pub sessions: u64,
    /// Highest number of participants present at the same time.
    pub peak_players: usize,
}

#[derive(Debug, Default)]
struct ArenaState {
    participants: HashMap<ParticipantId, Participant>,
    stats: ArenaStats,
}

/// A bounded collection of concurrently connected participants.
#[derive(Debug)]
pub struct Arena {
    /// Label used in log output
    name: String,
    /// Hard ceiling on concurrent participants
    capacity: usize,
    state: RwLock<ArenaState>,
}

impl Arena {
    /// Creates an empty arena.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used when logging joins and leaves
    /// * `capacity` - Maximum number of concurrent participants
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            state: RwLock::new(ArenaState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admits a new participant with the default spawn state.
    ///
    /// # Errors
    ///
    /// * `Validation` if `display_name` is blank
    /// * `DuplicateId` if `id` is already present, even when the arena is full
    /// * `CapacityExceeded` if the arena is full
    pub async fn join(
        &self,
        id: ParticipantId,
        display_name: impl Into<String>,
    ) -> RegistryResult<Participant> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(RegistryError::Validation(
                "display name cannot be empty".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state.participants.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        ensure_room(state.participants.len(), self.capacity)?;

        let participant = Participant::new(id, display_name);
        state.participants.insert(id, participant.clone());
        state.stats.sessions += 1;
        state.stats.peak_players = state.stats.peak_players.max(state.participants.len());

        info!(
            "🎮 {} joined {} ({}/{})",
            participant.display_name,
            self.name,
            state.participants.len(),
            self.capacity
        );
        Ok(participant)
    }

    /// Removes a participant. Returns whether anything was removed.
    ///
    /// Repeated calls for the same id are harmless and return `false`.
    pub async fn leave(&self, id: ParticipantId) -> bool {
        let mut state = self.state.write().await;
        match state.participants.remove(&id) {
            Some(participant) => {
                info!(
                    "👋 {} left {} ({}/{})",
                    participant.display_name,
                    self.name,
                    state.participants.len(),
                    self.capacity
                );
                true
            }
            None => false,
        }
    }

    /// Merges a client transform update into the participant's state.
    pub async fn update_state(
        &self,
        id: ParticipantId,
        update: StateUpdate,
    ) -> RegistryResult<Participant> {
        let mut state = self.state.write().await;
        let participant = state
            .participants
            .get_mut(&id)
            .ok_or_else(|| RegistryError::participant_not_found(id))?;

        if let Some(position) = update.position {
            participant.state.position = position;
        }
        if let Some(rotation) = update.rotation {
            participant.state.rotation = rotation;
        }
        Ok(participant.clone())
    }

    /// Applies a server-authoritative action to the participant's state.
    pub async fn apply_action(
        &self,
        id: ParticipantId,
        action: PlayerAction,
    ) -> RegistryResult<Participant> {
        let mut state = self.state.write().await;
        let participant = state
            .participants
            .get_mut(&id)
            .ok_or_else(|| RegistryError::participant_not_found(id))?;

        action.apply(&mut participant.state);
        debug!("{} performed {} in {}", participant.display_name, action, self.name);
        Ok(participant.clone())
    }

    pub async fn get(&self, id: ParticipantId) -> Option<Participant> {
        self.state.read().await.participants.get(&id).cloned()
    }

    pub async fn contains(&self, id: ParticipantId) -> bool {
        self.state.read().await.participants.contains_key(&id)
    }

    /// Snapshot of every participant. Order is unspecified.
    pub async fn list(&self) -> Vec<Participant> {
        self.state.read().await.participants.values().cloned().collect()
    }

    /// Ids of every participant. Order is unspecified.
    pub async fn participant_ids(&self) -> Vec<ParticipantId> {
        self.state.read().await.participants.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.participants.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.state.read().await.participants.len() >= self.capacity
    }

    pub async fn stats(&self) -> ArenaStats {
        self.state.read().await.stats
    }

    /// Removes and returns every participant.
    pub async fn drain(&self) -> Vec<Participant> {
        let mut state = self.state.write().await;
        let drained: Vec<_> = state.participants.drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            info!("🧹 Removed {} participant(s) from {}", drained.len(), self.name);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{JUMP_HEIGHT, SCORE_INCREMENT};
    use crate::types::{Vec3, DEFAULT_HEALTH};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_until_full() {
        let arena = Arena::new("lobby", 3);
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = ParticipantId::new();
            let participant = arena.join(id, format!("player{i}")).await.unwrap();
            assert_eq!(participant.id, id);
            ids.push(id);
        }

        assert!(arena.is_full().await);
        let overflow = arena.join(ParticipantId::new(), "late").await;
        assert!(matches!(
            overflow,
            Err(RegistryError::CapacityExceeded { capacity: 3 })
        ));
        assert_eq!(arena.len().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let arena = Arena::new("lobby", 4);
        let id = ParticipantId::new();
        arena.join(id, "alice").await.unwrap();

        let again = arena.join(id, "alice").await;
        assert!(matches!(again, Err(RegistryError::DuplicateId(_))));
        assert_eq!(arena.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_reported_before_full() {
        let arena = Arena::new("tiny", 1);
        let alice = ParticipantId::new();
        arena.join(alice, "alice").await.unwrap();
        assert!(arena.is_full().await);

        assert!(matches!(
            arena.join(alice, "alice").await,
            Err(RegistryError::DuplicateId(_))
        ));
        assert!(matches!(
            arena.join(ParticipantId::new(), "bob").await,
            Err(RegistryError::CapacityExceeded { capacity: 1 })
        ));
        assert_eq!(arena.stats().await.sessions, 1);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let arena = Arena::new("lobby", 4);
        let result = arena.join(ParticipantId::new(), "   ").await;
        assert!(matches!(result, Err(RegistryError::Validation(_))));
        assert!(arena.is_empty().await);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let arena = Arena::new("lobby", 2);
        let id = ParticipantId::new();
        arena.join(id, "alice").await.unwrap();

        assert!(arena.leave(id).await);
        assert!(!arena.leave(id).await);
        assert!(!arena.leave(ParticipantId::new()).await);
    }

    #[tokio::test]
    async fn test_leave_frees_a_slot() {
        let arena = Arena::new("lobby", 1);
        let first = ParticipantId::new();
        arena.join(first, "alice").await.unwrap();
        assert!(arena.join(ParticipantId::new(), "bob").await.is_err());

        arena.leave(first).await;
        assert!(arena.join(ParticipantId::new(), "bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_state_keeps_health_and_score() {
        let arena = Arena::new("lobby", 2);
        let id = ParticipantId::new();
        arena.join(id, "alice").await.unwrap();
        arena.apply_action(id, PlayerAction::ScoreUp).await.unwrap();

        let updated = arena
            .update_state(
                id,
                StateUpdate {
                    position: Some(Vec3::new(10.0, 2.0, -3.0)),
                    rotation: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.state.position, Vec3::new(10.0, 2.0, -3.0));
        assert_eq!(updated.state.rotation, Vec3::zero());
        assert_eq!(updated.state.health, DEFAULT_HEALTH);
        assert_eq!(updated.state.score, SCORE_INCREMENT);
    }

    #[tokio::test]
    async fn test_unknown_participant_is_not_found() {
        let arena = Arena::new("lobby", 2);
        let ghost = ParticipantId::new();

        let update = arena.update_state(ghost, StateUpdate::default()).await;
        assert!(matches!(update, Err(RegistryError::NotFound { .. })));

        let action = arena.apply_action(ghost, PlayerAction::Jump).await;
        assert!(matches!(action, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_actions() {
        let arena = Arena::new("lobby", 2);
        let id = ParticipantId::new();
        arena.join(id, "alice").await.unwrap();

        let jumped = arena.apply_action(id, PlayerAction::Jump).await.unwrap();
        assert_eq!(jumped.state.position.y, JUMP_HEIGHT);
        assert_eq!(jumped.state.score, 0);

        let scored = arena.apply_action(id, PlayerAction::ScoreUp).await.unwrap();
        assert_eq!(scored.state.score, SCORE_INCREMENT);
        assert_eq!(scored.state.health, DEFAULT_HEALTH);
        assert_eq!(scored.state.position.y, JUMP_HEIGHT);
    }

    #[tokio::test]
    async fn test_stats_and_drain() {
        let arena = Arena::new("lobby", 5);
        let a = ParticipantId::new();
        arena.join(a, "alice").await.unwrap();
        arena.join(ParticipantId::new(), "bob").await.unwrap();
        arena.leave(a).await;
        arena.join(ParticipantId::new(), "carol").await.unwrap();

        let stats = arena.stats().await;
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.peak_players, 2);

        let drained = arena.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(arena.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_joins_respect_capacity() {
        let arena = Arc::new(Arena::new("lobby", 8));
        let joins = (0..32).map(|i| {
            let arena = arena.clone();
            tokio::spawn(async move { arena.join(ParticipantId::new(), format!("p{i}")).await })
        });

        let mut admitted = 0;
        for handle in joins {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 8);
        assert_eq!(arena.len().await, 8);
    }
}
