//! Server-authoritative participant actions.
//!
//! Actions are the only way health and score change. Each variant carries its
//! own effect in [`PlayerAction::apply`]; adding an action means adding a
//! variant and its match arm.

use crate::types::ParticipantState;
use serde::{Deserialize, Serialize};

/// Vertical displacement applied by a jump.
pub const JUMP_HEIGHT: f64 = 5.0;

/// Points awarded per `score_up`.
pub const SCORE_INCREMENT: i64 = 10;

/// An action a participant asks the server to perform on its own state.
///
/// On the wire this is the bare action name, e.g. `"jump"` or `"score_up"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Jump,
    ScoreUp,
}

impl PlayerAction {
    /// Applies this action's effect to `state`.
    pub fn apply(self, state: &mut ParticipantState) {
        match self {
            PlayerAction::Jump => state.position.y += JUMP_HEIGHT,
            PlayerAction::ScoreUp => state.score += SCORE_INCREMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlayerAction::Jump => "jump",
            PlayerAction::ScoreUp => "score_up",
        }
    }
}

impl std::str::FromStr for PlayerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jump" => Ok(PlayerAction::Jump),
            "score_up" => Ok(PlayerAction::ScoreUp),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

impl std::fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
