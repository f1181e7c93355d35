//! Translation of client events into registry calls.
//!
//! The dispatcher mutates state through the lobby arena and the resource
//! registry, then describes who should hear about it as an [`Outcome`]. It
//! never sends anything itself; the connection layer delivers outcomes.

use crate::api::{ApiRequest, ManagementApi};
use crate::messaging::{ClientMessage, ServerMessage};
use arena_core::{
    current_timestamp, Arena, ParticipantId, PlayerAction, RegistryError, RegistryResult,
    ResourceId, ResourceRegistry, StateUpdate,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a session's participant currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Lobby,
    Game(ResourceId),
}

/// Per-connection state owned by the connection task.
#[derive(Debug)]
pub struct Session {
    participant_id: ParticipantId,
    location: Option<Location>,
}

impl Session {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            location: None,
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

/// One message addressed to a set of participants.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub recipients: Vec<ParticipantId>,
    pub message: ServerMessage,
}

/// Messages to deliver after handling one client event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Messages for the sender only
    pub replies: Vec<ServerMessage>,
    pub broadcasts: Vec<Broadcast>,
}

impl Outcome {
    pub fn reply(message: ServerMessage) -> Self {
        Self {
            replies: vec![message],
            broadcasts: Vec::new(),
        }
    }

    pub fn with_reply(mut self, message: ServerMessage) -> Self {
        self.replies.push(message);
        self
    }

    pub fn with_broadcast(mut self, recipients: Vec<ParticipantId>, message: ServerMessage) -> Self {
        if !recipients.is_empty() {
            self.broadcasts.push(Broadcast {
                recipients,
                message,
            });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.broadcasts.is_empty()
    }
}

fn not_joined(participant_id: ParticipantId) -> RegistryError {
    RegistryError::NotFound {
        kind: "Participant",
        id: participant_id.to_string(),
    }
}

async fn everyone_except(arena: &Arena, excluded: ParticipantId) -> Vec<ParticipantId> {
    arena
        .participant_ids()
        .await
        .into_iter()
        .filter(|id| *id != excluded)
        .collect()
}

/// Routes client events for every connection of one server.
pub struct Dispatcher {
    lobby: Arc<Arena>,
    registry: Arc<ResourceRegistry>,
    api: ManagementApi,
}

impl Dispatcher {
    pub fn new(lobby: Arc<Arena>, registry: Arc<ResourceRegistry>) -> Self {
        let api = ManagementApi::new(registry.clone(), lobby.clone());
        Self {
            lobby,
            registry,
            api,
        }
    }

    pub fn api(&self) -> &ManagementApi {
        &self.api
    }

    /// Handles one client event. Failures become an `error` reply.
    pub async fn dispatch(&self, session: &mut Session, message: ClientMessage) -> Outcome {
        match self.handle(session, message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Request from {} failed: {}", session.participant_id, e);
                Outcome::reply(ServerMessage::error(e.to_string(), e.status_code()))
            }
        }
    }

    /// Removes the session's participant after its socket closed.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub async fn disconnect(&self, session: &mut Session) -> Outcome {
        self.leave(session).await
    }

    async fn handle(&self, session: &mut Session, message: ClientMessage) -> RegistryResult<Outcome> {
        match message {
            ClientMessage::PlayerJoin { username, game_id } => {
                self.join(session, username, game_id).await
            }
            ClientMessage::PlayerMove { position, rotation } => {
                self.move_player(session, StateUpdate { position, rotation })
                    .await
            }
            ClientMessage::ChatMessage { message } => self.chat(session, message).await,
            ClientMessage::PlayerAction { action } => {
                let action: PlayerAction = action.parse().map_err(RegistryError::Validation)?;
                self.act(session, action).await
            }
            ClientMessage::Leave => Ok(self.leave(session).await),

            ClientMessage::DiscoverGames => Ok(self.manage(ApiRequest::ListResources).await),
            ClientMessage::RegisterGame { spec } => Ok(self.manage(ApiRequest::Register(spec)).await),
            ClientMessage::StartGame { game_id, options } => Ok(self
                .manage(ApiRequest::Start {
                    resource_id: game_id,
                    options,
                })
                .await),
            ClientMessage::StopGame { game_id } => Ok(self.manage(ApiRequest::Stop(game_id)).await),
            ClientMessage::UnregisterGame { game_id } => {
                Ok(self.manage(ApiRequest::Unregister(game_id)).await)
            }
            ClientMessage::GetGameStatus { game_id } => {
                Ok(self.manage(ApiRequest::InstanceStats(game_id)).await)
            }
            ClientMessage::ListInstances => Ok(self.manage(ApiRequest::ListInstances).await),
            ClientMessage::Health => Ok(self.manage(ApiRequest::Health).await),
        }
    }

    async fn manage(&self, request: ApiRequest) -> Outcome {
        let response = self.api.handle(request).await;
        Outcome::reply(ServerMessage::ApiResponse {
            status: response.status,
            body: response.body,
        })
    }

    /// The arena the session's participant is in.
    ///
    /// A location whose arena is gone or no longer holds the participant (the
    /// game was stopped) is cleared.
    async fn current_arena(&self, session: &mut Session) -> Option<Arc<Arena>> {
        let arena = match session.location.as_ref()? {
            Location::Lobby => Some(self.lobby.clone()),
            Location::Game(id) => self.registry.arena(id).await,
        };

        match arena {
            Some(arena) if arena.contains(session.participant_id).await => Some(arena),
            _ => {
                debug!("Clearing stale location of {}", session.participant_id);
                session.location = None;
                None
            }
        }
    }

    async fn require_arena(&self, session: &mut Session) -> RegistryResult<Arc<Arena>> {
        self.current_arena(session)
            .await
            .ok_or_else(|| not_joined(session.participant_id))
    }

    async fn join(
        &self,
        session: &mut Session,
        username: String,
        game_id: Option<ResourceId>,
    ) -> RegistryResult<Outcome> {
        if self.current_arena(session).await.is_some() {
            return Err(RegistryError::Validation(
                "already joined, leave first".to_string(),
            ));
        }

        let id = session.participant_id;
        let (arena, participant, location) = match game_id.clone() {
            Some(game_id) => {
                let participant = self.registry.join_instance(&game_id, id, username).await?;
                let arena = self
                    .registry
                    .arena(&game_id)
                    .await
                    .ok_or_else(|| not_joined(id))?;
                (arena, participant, Location::Game(game_id))
            }
            None => {
                let participant = self.lobby.join(id, username).await?;
                (self.lobby.clone(), participant, Location::Lobby)
            }
        };
        session.location = Some(location);

        let players = arena.list().await;
        let others = everyone_except(&arena, id).await;

        Ok(Outcome::reply(ServerMessage::JoinSuccess {
            player_id: id,
            player_count: players.len(),
            max_players: arena.capacity(),
            game_id,
        })
        .with_reply(ServerMessage::CurrentPlayers { players })
        .with_broadcast(others, ServerMessage::PlayerJoined { player: participant }))
    }

    async fn move_player(&self, session: &mut Session, update: StateUpdate) -> RegistryResult<Outcome> {
        if update.is_empty() {
            return Err(RegistryError::Validation(
                "player_move needs a position or a rotation".to_string(),
            ));
        }

        let arena = self.require_arena(session).await?;
        let participant = arena.update_state(session.participant_id, update).await?;
        let others = everyone_except(&arena, participant.id).await;

        Ok(Outcome::default().with_broadcast(
            others,
            ServerMessage::PlayerMoved {
                player_id: participant.id,
                position: participant.state.position,
                rotation: participant.state.rotation,
            },
        ))
    }

    async fn chat(&self, session: &mut Session, message: String) -> RegistryResult<Outcome> {
        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(RegistryError::Validation("chat message cannot be empty".to_string()));
        }

        let arena = self.require_arena(session).await?;
        let sender = arena
            .get(session.participant_id)
            .await
            .ok_or_else(|| not_joined(session.participant_id))?;

        Ok(Outcome::default().with_broadcast(
            arena.participant_ids().await,
            ServerMessage::ChatMessage {
                player_id: sender.id,
                username: sender.display_name,
                message,
                timestamp: current_timestamp(),
            },
        ))
    }

    async fn act(&self, session: &mut Session, action: PlayerAction) -> RegistryResult<Outcome> {
        let arena = self.require_arena(session).await?;
        let participant = arena.apply_action(session.participant_id, action).await?;
        let update = ServerMessage::PlayerUpdated {
            player_id: participant.id,
            health: participant.state.health,
            score: participant.state.score,
            position: participant.state.position,
        };

        // The actor gets its authoritative state back as a reply
        Ok(Outcome::reply(update.clone())
            .with_broadcast(everyone_except(&arena, participant.id).await, update))
    }

    async fn leave(&self, session: &mut Session) -> Outcome {
        let Some(location) = session.location.take() else {
            return Outcome::default();
        };

        let id = session.participant_id;
        let arena = match &location {
            Location::Lobby => {
                self.lobby.leave(id).await;
                Some(self.lobby.clone())
            }
            Location::Game(game_id) => {
                if !self.registry.leave_instance(game_id, id).await {
                    return Outcome::default();
                }
                self.registry.arena(game_id).await
            }
        };

        match arena {
            Some(arena) => Outcome::default().with_broadcast(
                arena.participant_ids().await,
                ServerMessage::PlayerLeft { player_id: id },
            ),
            None => Outcome::default(),
        }
    }
}
