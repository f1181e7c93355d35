//! Message type definitions for client-server communication.
//!
//! Every frame is a JSON text message of the form
//! `{ "type": "<event>", "payload": { ... } }`. Events without data may omit
//! `payload`.

use crate::error::ServerError;
use arena_core::{Participant, ParticipantId, ResourceId, ResourceSpec, StartOptions, Vec3};
use serde::{Deserialize, Serialize};

/// A message sent from a client to the server.
///
/// # Example
///
/// ```json
/// { "type": "player_join", "payload": { "username": "alice" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the lobby, or the running instance of `game_id`
    PlayerJoin {
        username: String,
        #[serde(default)]
        game_id: Option<ResourceId>,
    },
    PlayerMove {
        #[serde(default)]
        position: Option<Vec3>,
        #[serde(default)]
        rotation: Option<Vec3>,
    },
    ChatMessage {
        message: String,
    },
    PlayerAction {
        action: String,
    },
    Leave,

    // Management events
    DiscoverGames,
    RegisterGame {
        spec: ResourceSpec,
    },
    StartGame {
        game_id: ResourceId,
        #[serde(default)]
        options: StartOptions,
    },
    StopGame {
        game_id: ResourceId,
    },
    UnregisterGame {
        game_id: ResourceId,
    },
    GetGameStatus {
        game_id: ResourceId,
    },
    ListInstances,
    Health,
}

impl ClientMessage {
    /// Decodes one text frame.
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        serde_json::from_str(text)
            .map_err(|e| ServerError::Protocol(format!("invalid message: {e}")))
    }
}

/// A message sent from the server to one or more clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinSuccess {
        player_id: ParticipantId,
        player_count: usize,
        max_players: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<ResourceId>,
    },
    CurrentPlayers {
        players: Vec<Participant>,
    },
    PlayerJoined {
        player: Participant,
    },
    PlayerMoved {
        player_id: ParticipantId,
        position: Vec3,
        rotation: Vec3,
    },
    ChatMessage {
        player_id: ParticipantId,
        username: String,
        message: String,
        timestamp: u64,
    },
    PlayerUpdated {
        player_id: ParticipantId,
        health: i32,
        score: i64,
        position: Vec3,
    },
    PlayerLeft {
        player_id: ParticipantId,
    },
    GameShutdown {
        game_id: ResourceId,
        reason: String,
    },
    ApiResponse {
        status: u16,
        body: serde_json::Value,
    },
    Error {
        message: String,
        status: u16,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, status: u16) -> Self {
        ServerMessage::Error {
            message: message.into(),
            status,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
