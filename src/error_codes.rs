//! Error codes reported by the game server in `ERR` lines.
//!
//! Codes travel as plain integers. Any integer the client does not know
//! decodes to [`ErrorCode::UnknownError`] so that a newer server can never
//! make an error line unreadable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the game server.
///
/// Use [`description()`](ErrorCode::description) for a short advisory that can
/// be shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    /// The submitted movement is not legal in the current state.
    InvalidMovement,
    /// A movement was submitted while it was the opponent's turn.
    NotPlayerTurn,
    /// The option cannot be changed (usually because the game has started).
    OptionNonModifiable,
    /// The server did not understand the command.
    InvalidCommand,
    /// The option already had the requested value.
    OptionValueNotUpdated,
    /// Any other failure, including codes this client does not know.
    UnknownError,
}

impl ErrorCode {
    /// Returns the numeric wire value for this code.
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidMovement => 101,
            Self::NotPlayerTurn => 102,
            Self::OptionNonModifiable => 103,
            Self::InvalidCommand => 199,
            Self::OptionValueNotUpdated => 201,
            Self::UnknownError => 999,
        }
    }

    /// Returns a short advisory describing this code.
    pub fn description(self) -> &'static str {
        match self {
            Self::InvalidMovement => "Invalid movement, try again.",
            Self::NotPlayerTurn => "It's not your turn.",
            Self::OptionNonModifiable => "That option can't be changed right now.",
            Self::InvalidCommand => "The server did not understand the last command.",
            Self::OptionValueNotUpdated => "That option already has this value.",
            Self::UnknownError => "Something went wrong on the server.",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            101 => Self::InvalidMovement,
            102 => Self::NotPlayerTurn,
            103 => Self::OptionNonModifiable,
            199 => Self::InvalidCommand,
            201 => Self::OptionValueNotUpdated,
            _ => Self::UnknownError,
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_both_ways() {
        for code in [
            ErrorCode::InvalidMovement,
            ErrorCode::NotPlayerTurn,
            ErrorCode::OptionNonModifiable,
            ErrorCode::InvalidCommand,
            ErrorCode::OptionValueNotUpdated,
            ErrorCode::UnknownError,
        ] {
            assert_eq!(ErrorCode::from(code.code()), code);
        }
    }

    #[test]
    fn unknown_integers_fall_back() {
        assert_eq!(ErrorCode::from(0), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::from(104), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::from(-1), ErrorCode::UnknownError);
    }

    #[test]
    fn serializes_as_integer() {
        assert_eq!(serde_json::to_string(&ErrorCode::NotPlayerTurn).unwrap(), "102");
        let code: ErrorCode = serde_json::from_str("4242").unwrap();
        assert_eq!(code, ErrorCode::UnknownError);
    }
}
