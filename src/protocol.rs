//! Typed messages exchanged with the game server.
//!
//! [`ClientMessage`] is what the player sends, [`ServerMessage`] is what the
//! server (or the local opponent) reports back. Both are translated to and
//! from wire lines by [`crate::codec`].

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::engine::{GameState, RelativeMovement};
use crate::error_codes::ErrorCode;

/// Unique identifier for a user taking part in a match.
pub type UserId = Uuid;

// ── Options ─────────────────────────────────────────────────────────

/// Match options that can be toggled before the game starts.
///
/// The wire name is the variant name (`Mosquito`, `NoFirstMoveQueen`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionKey {
    /// Play with the mosquito expansion piece.
    Mosquito,
    /// Play with the ladybug expansion piece.
    Ladybug,
    /// Play with the pillbug expansion piece.
    Pillbug,
    /// Forbid placing the queen as the first piece.
    NoFirstMoveQueen,
    /// Let spectators join the match.
    AllowSpectators,
}

impl OptionKey {
    pub const ALL: [Self; 5] = [
        Self::Mosquito,
        Self::Ladybug,
        Self::Pillbug,
        Self::NoFirstMoveQueen,
        Self::AllowSpectators,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mosquito => "Mosquito",
            Self::Ladybug => "Ladybug",
            Self::Pillbug => "Pillbug",
            Self::NoFirstMoveQueen => "NoFirstMoveQueen",
            Self::AllowSpectators => "AllowSpectators",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an option name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption(pub String);

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown option `{}`", self.0)
    }
}

impl std::error::Error for UnknownOption {}

impl FromStr for OptionKey {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownOption(s.to_string()))
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// An error reported by the server in an `ERR` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The user the error concerns, when the server names one.
    pub user: Option<UserId>,
    pub code: ErrorCode,
    pub description: String,
}

impl ServerError {
    pub fn new(user: Option<UserId>, code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            user,
            code,
            description: description.into(),
        }
    }

    /// The synthetic error used when an `ERR` line cannot be parsed.
    pub fn unknown(description: impl Into<String>) -> Self {
        Self::new(None, ErrorCode::UnknownError, description)
    }

    /// A short advisory suitable for a transient notice.
    pub fn advisory(&self) -> &'static str {
        self.code.description()
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code.description(), self.code.code())?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Submit a movement in engine notation.
    Movement(RelativeMovement),
    /// Change a match option.
    SetOption(OptionKey, bool),
    /// Send a chat line.
    Chat(String),
    /// Signal readiness to start ("good luck, have fun").
    ReadyToPlay,
    /// Concede the match.
    Forfeit,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage<S> {
    /// The authoritative game state.
    GameState(S),
    /// A match option changed.
    SetOption(OptionKey, bool),
    /// A player toggled readiness.
    PlayerReady(UserId, bool),
    /// A player or spectator joined.
    PlayerJoined(UserId),
    /// A player or spectator left.
    PlayerLeft(UserId),
    /// A chat line from a user.
    Chat(UserId, String),
    /// A user forfeited.
    Forfeit(UserId),
    /// The game is over. `None` means a draw.
    GameOver(Option<UserId>),
    /// The server rejected something.
    Error(ServerError),
}

impl<S: GameState> ServerMessage<S> {
    /// Short variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GameState(_) => "GameState",
            Self::SetOption(..) => "SetOption",
            Self::PlayerReady(..) => "PlayerReady",
            Self::PlayerJoined(_) => "PlayerJoined",
            Self::PlayerLeft(_) => "PlayerLeft",
            Self::Chat(..) => "Chat",
            Self::Forfeit(_) => "Forfeit",
            Self::GameOver(_) => "GameOver",
            Self::Error(_) => "Error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn option_names_round_trip() {
        for key in OptionKey::ALL {
            assert_eq!(key.as_str().parse::<OptionKey>().unwrap(), key);
        }
        assert_eq!(
            "Scorpion".parse::<OptionKey>(),
            Err(UnknownOption("Scorpion".into()))
        );
        // Names are case-sensitive.
        assert!("mosquito".parse::<OptionKey>().is_err());
    }

    #[test]
    fn server_error_display_includes_description() {
        let err = ServerError::new(None, ErrorCode::NotPlayerTurn, "wait for bQ1");
        assert_eq!(err.to_string(), "It's not your turn. (102): wait for bQ1");
        assert_eq!(
            ServerError::unknown("").to_string(),
            "Something went wrong on the server. (999)"
        );
    }
}
