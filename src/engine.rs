//! The seam between the client and the Hive rules engine.
//!
//! The client never computes move legality or inspects board geometry. It only
//! needs a handful of queries on the current game state, captured by the
//! [`GameState`] trait: which moves are available, whose turn it is, what the
//! last recorded move was, and how to read and write the `STATE` payload.
//!
//! [`StateSnapshot`] is a serializable implementation of that trait. It records
//! history and hands the turn over, consuming moves from per-player lists, but
//! it does not know the rules of Hive. It backs the local opponent in tests and
//! demos and doubles as the JSON `STATE` payload format.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

// ── Pieces and positions ────────────────────────────────────────────

/// One of the two sides in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    White,
    Black,
}

impl Player {
    /// Returns the other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    fn notation(self) -> char {
        match self {
            Self::White => 'w',
            Self::Black => 'b',
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("White"),
            Self::Black => f.write_str("Black"),
        }
    }
}

/// The kind of bug a unit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitClass {
    Ant,
    Beetle,
    Hopper,
    Ladybug,
    Mosquito,
    Pillbug,
    Queen,
    Spider,
}

impl UnitClass {
    fn notation(self) -> char {
        match self {
            Self::Ant => 'A',
            Self::Beetle => 'B',
            Self::Hopper => 'G',
            Self::Ladybug => 'L',
            Self::Mosquito => 'M',
            Self::Pillbug => 'P',
            Self::Queen => 'Q',
            Self::Spider => 'S',
        }
    }
}

/// A single piece, identified by owner, class and index (`wA1`, `bQ1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Unit {
    pub owner: Player,
    pub class: UnitClass,
    pub index: u8,
}

impl Unit {
    pub fn new(owner: Player, class: UnitClass, index: u8) -> Self {
        Self {
            owner,
            class,
            index,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.owner.notation(),
            self.class.notation(),
            self.index
        )
    }
}

/// A cell on the board in cube coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

// ── Movements ───────────────────────────────────────────────────────

/// A single action a player can take on their turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Movement {
    /// Skip the turn. Only legal when nothing else is.
    Pass,
    /// Move a unit already on the board.
    Move { unit: Unit, to: Position },
    /// A pillbug (or mosquito acting as one) relocates an adjacent unit.
    Yoink {
        pillbug: Unit,
        unit: Unit,
        to: Position,
    },
    /// Place a unit from the hand.
    Place { unit: Unit, to: Position },
}

/// Coarse classification of a [`Movement`], used for narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementKind {
    Pass,
    Move,
    Yoink,
    Place,
}

impl Movement {
    /// The unit that ends up somewhere new, if any.
    pub fn moved_unit(&self) -> Option<Unit> {
        match self {
            Self::Pass => None,
            Self::Move { unit, .. } | Self::Yoink { unit, .. } | Self::Place { unit, .. } => {
                Some(*unit)
            }
        }
    }

    /// Where the moved unit ends up, if anywhere.
    pub fn target_position(&self) -> Option<Position> {
        match self {
            Self::Pass => None,
            Self::Move { to, .. } | Self::Yoink { to, .. } | Self::Place { to, .. } => Some(*to),
        }
    }

    pub fn kind(&self) -> MovementKind {
        match self {
            Self::Pass => MovementKind::Pass,
            Self::Move { .. } => MovementKind::Move,
            Self::Yoink { .. } => MovementKind::Yoink,
            Self::Place { .. } => MovementKind::Place,
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Move { unit, to } => write!(f, "move {unit} {to}"),
            Self::Yoink { pillbug, unit, to } => write!(f, "yoink {pillbug} {unit} {to}"),
            Self::Place { unit, to } => write!(f, "place {unit} {to}"),
        }
    }
}

/// One entry in a game's move history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveRecord {
    pub player: Player,
    pub movement: Movement,
}

/// A movement expressed in the engine's wire notation, as sent after `MOV`.
///
/// The client treats the notation as opaque; only the engine produces and
/// resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativeMovement {
    notation: String,
}

impl RelativeMovement {
    pub fn new(notation: impl Into<String>) -> Self {
        Self {
            notation: notation.into(),
        }
    }

    pub fn notation(&self) -> &str {
        &self.notation
    }
}

impl fmt::Display for RelativeMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notation)
    }
}

// ── GameState ───────────────────────────────────────────────────────

/// Queries the client needs from the rules engine's game state.
///
/// Implementations own all rules knowledge. The client only compares moves
/// for equality, reads the trailing history entry, and round-trips the state
/// through the `STATE` payload.
pub trait GameState: Clone + fmt::Debug + Send + Sync + 'static {
    /// Moves the current player may make.
    fn available_moves(&self) -> &[Movement];

    /// The side whose turn it is.
    fn current_player(&self) -> Player;

    /// The most recent entry of the move history.
    fn last_update(&self) -> Option<&MoveRecord>;

    /// Whether the game is over.
    fn has_game_ended(&self) -> bool;

    /// The winning side, or `None` for a draw or an unfinished game.
    fn winner(&self) -> Option<Player>;

    /// Apply `movement` for the current player. Returns `false` and leaves the
    /// state untouched if the movement is not available.
    fn apply(&mut self, movement: &Movement) -> bool;

    /// Express `movement` in wire notation.
    fn relative_movement(&self, movement: &Movement) -> Option<RelativeMovement>;

    /// Map wire notation back onto one of the available moves.
    fn resolve(&self, relative: &RelativeMovement) -> Option<Movement>;

    /// Serialize the state for a `STATE` payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Serialization`] if the state cannot be encoded.
    fn encode_state(&self) -> Result<String, ConnectionError>;

    /// Parse a `STATE` payload. Returns `None` if the payload is malformed.
    fn decode_state(payload: &str) -> Option<Self>;
}

// ── StateSnapshot ───────────────────────────────────────────────────

/// A JSON-serializable [`GameState`] that records play without knowing the rules.
///
/// Each side has a list of moves it may still make. Applying a move records
/// it, removes it from the mover's list (passes stay available), and hands the
/// turn over. The game ends once neither side has anything left to play, or
/// when [`ended`](Self::ended) is set explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current_player: Player,
    #[serde(default)]
    pub white_moves: Vec<Movement>,
    #[serde(default)]
    pub black_moves: Vec<Movement>,
    #[serde(default)]
    pub updates: Vec<MoveRecord>,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Player>,
}

impl StateSnapshot {
    /// A fresh game with white to move and no moves available to either side.
    pub fn new() -> Self {
        Self {
            current_player: Player::White,
            white_moves: Vec::new(),
            black_moves: Vec::new(),
            updates: Vec::new(),
            ended: false,
            winner: None,
        }
    }

    #[must_use]
    pub fn with_current_player(mut self, player: Player) -> Self {
        self.current_player = player;
        self
    }

    /// Replace the moves available to `player`.
    #[must_use]
    pub fn with_moves(mut self, player: Player, moves: Vec<Movement>) -> Self {
        *self.moves_mut(player) = moves;
        self
    }

    /// Append an entry to the move history without touching anything else.
    #[must_use]
    pub fn with_update(mut self, player: Player, movement: Movement) -> Self {
        self.updates.push(MoveRecord { player, movement });
        self
    }

    /// Mark the game as finished.
    #[must_use]
    pub fn with_ended(mut self, winner: Option<Player>) -> Self {
        self.ended = true;
        self.winner = winner;
        self
    }

    fn moves_for(&self, player: Player) -> &[Movement] {
        match player {
            Player::White => &self.white_moves,
            Player::Black => &self.black_moves,
        }
    }

    fn moves_mut(&mut self, player: Player) -> &mut Vec<Movement> {
        match player {
            Player::White => &mut self.white_moves,
            Player::Black => &mut self.black_moves,
        }
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState for StateSnapshot {
    fn available_moves(&self) -> &[Movement] {
        if self.ended {
            return &[];
        }
        self.moves_for(self.current_player)
    }

    fn current_player(&self) -> Player {
        self.current_player
    }

    fn last_update(&self) -> Option<&MoveRecord> {
        self.updates.last()
    }

    fn has_game_ended(&self) -> bool {
        self.ended
    }

    fn winner(&self) -> Option<Player> {
        self.winner
    }

    fn apply(&mut self, movement: &Movement) -> bool {
        if !self.available_moves().contains(movement) {
            return false;
        }
        let mover = self.current_player;
        if *movement != Movement::Pass {
            self.moves_mut(mover).retain(|m| m != movement);
        }
        self.updates.push(MoveRecord {
            player: mover,
            movement: *movement,
        });
        self.current_player = mover.opponent();

        let only_passes = |moves: &Vec<Movement>| moves.iter().all(|m| *m == Movement::Pass);
        if only_passes(&self.white_moves) && only_passes(&self.black_moves) {
            self.ended = true;
        }
        true
    }

    fn relative_movement(&self, movement: &Movement) -> Option<RelativeMovement> {
        Some(RelativeMovement::new(movement.to_string()))
    }

    fn resolve(&self, relative: &RelativeMovement) -> Option<Movement> {
        self.available_moves()
            .iter()
            .find(|m| m.to_string() == relative.notation())
            .copied()
    }

    fn encode_state(&self) -> Result<String, ConnectionError> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode_state(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ant(owner: Player) -> Unit {
        Unit::new(owner, UnitClass::Ant, 1)
    }

    #[test]
    fn unit_and_movement_notation() {
        let queen = Unit::new(Player::Black, UnitClass::Queen, 1);
        assert_eq!(queen.to_string(), "bQ1");
        let movement = Movement::Place {
            unit: ant(Player::White),
            to: Position::new(1, -1, 0),
        };
        assert_eq!(movement.to_string(), "place wA1 1,-1,0");
        assert_eq!(Movement::Pass.to_string(), "pass");
    }

    #[test]
    fn movement_accessors() {
        let pillbug = Unit::new(Player::White, UnitClass::Pillbug, 1);
        let yoink = Movement::Yoink {
            pillbug,
            unit: ant(Player::Black),
            to: Position::ORIGIN,
        };
        assert_eq!(yoink.moved_unit(), Some(ant(Player::Black)));
        assert_eq!(yoink.target_position(), Some(Position::ORIGIN));
        assert_eq!(yoink.kind(), MovementKind::Yoink);
        assert_eq!(Movement::Pass.moved_unit(), None);
    }

    #[test]
    fn apply_records_history_and_hands_over_turn() {
        let place = Movement::Place {
            unit: ant(Player::White),
            to: Position::ORIGIN,
        };
        let reply = Movement::Place {
            unit: ant(Player::Black),
            to: Position::new(0, 1, -1),
        };
        let mut state = StateSnapshot::new()
            .with_moves(Player::White, vec![place, Movement::Pass])
            .with_moves(Player::Black, vec![reply]);

        assert!(state.apply(&place));
        assert_eq!(state.current_player(), Player::Black);
        assert_eq!(
            state.last_update(),
            Some(&MoveRecord {
                player: Player::White,
                movement: place
            })
        );
        assert!(!state.has_game_ended());

        assert!(state.apply(&reply));
        assert!(state.has_game_ended(), "only passes are left");
    }

    #[test]
    fn apply_rejects_unavailable_moves() {
        let mut state = StateSnapshot::new().with_moves(Player::White, vec![Movement::Pass]);
        let before = state.clone();
        let bogus = Movement::Move {
            unit: ant(Player::White),
            to: Position::ORIGIN,
        };
        assert!(!state.apply(&bogus));
        assert_eq!(state, before);
    }

    #[test]
    fn resolve_finds_available_move_by_notation() {
        let place = Movement::Place {
            unit: ant(Player::White),
            to: Position::ORIGIN,
        };
        let state = StateSnapshot::new().with_moves(Player::White, vec![place]);
        let relative = state.relative_movement(&place).unwrap();
        assert_eq!(state.resolve(&relative), Some(place));
        assert_eq!(state.resolve(&RelativeMovement::new("move wQ1 9,9,-18")), None);
    }

    #[test]
    fn state_payload_round_trips() {
        let state = StateSnapshot::new()
            .with_moves(Player::White, vec![Movement::Pass])
            .with_update(Player::Black, Movement::Pass);
        let payload = state.encode_state().expect("encode");
        assert_eq!(StateSnapshot::decode_state(&payload), Some(state));
        assert_eq!(StateSnapshot::decode_state("{not json"), None);
    }
}
