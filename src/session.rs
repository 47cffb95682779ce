//! Turn state machine for one match.
//!
//! [`GameSession`] is a synchronous, single-writer state machine. It consumes
//! connection events and player intents, and records what should happen next
//! as [`SessionAction`]s (messages to send, reconnects, notices for the UI).
//! The caller drains them with [`GameSession::take_actions`] and executes
//! them; [`crate::driver`] does this inside a spawned task.
//!
//! ```text
//!   Begin ──► GameStart ──► PlayerTurn ──► SendingMovement
//!                  │             ▲               │
//!                  ▼             │               ▼
//!             OpponentTurn ◄─────┴───────── OpponentTurn / GameEnd
//!
//!   any ──► Forfeit (then only ShutDown)      any ──► ShutDown
//! ```
//!
//! Transitions outside the table are dropped silently: a late or duplicate
//! network event must never move the session backwards.
//!
//! Outgoing messages are held while the connection is down and go out, in
//! order, after the next `Connected`. A movement that was already on the wire
//! when the link failed is sent again if the first state after reconnecting
//! shows the server never applied it.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use tracing::{debug, info, warn};

use crate::client::EventResult;
use crate::engine::{GameState, Movement, MovementKind, Player, Position, Unit};
use crate::event::{ConnectionEvent, CLOSE_NORMAL};
use crate::protocol::{ClientMessage, OptionKey, ServerError, ServerMessage, UserId};

/// Default number of consecutive reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_CEILING: u32 = 5;

// ── States ──────────────────────────────────────────────────────────

/// Where a match currently stands, from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing observed yet.
    Begin,
    /// Connected, waiting for the first game state.
    GameStart,
    /// The local player may move.
    PlayerTurn,
    /// Waiting for the opponent.
    OpponentTurn,
    /// A movement was sent and awaits the server's next state.
    SendingMovement(Movement),
    /// The game is over.
    GameEnd,
    /// The match was forfeited, by either side or after losing the connection.
    Forfeit,
    /// The session was torn down.
    ShutDown,
}

impl SessionState {
    /// Whether `self → next` is in the transition table.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (ShutDown, _) => false,
            (_, ShutDown) => true,
            (Forfeit, _) => false,
            (_, Forfeit) => true,
            (Begin, GameStart)
            | (GameStart, PlayerTurn | OpponentTurn)
            | (PlayerTurn, SendingMovement(_))
            | (SendingMovement(_), OpponentTurn | GameEnd)
            | (OpponentTurn, PlayerTurn | GameEnd) => true,
            _ => false,
        }
    }

    /// `PlayerTurn`, `OpponentTurn` or `SendingMovement`.
    pub fn in_game(&self) -> bool {
        matches!(
            self,
            Self::PlayerTurn | Self::OpponentTurn | Self::SendingMovement(_)
        )
    }

    /// `Forfeit` or `ShutDown`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Forfeit | Self::ShutDown)
    }

    /// Whether the match can no longer change, including a finished game.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == Self::GameEnd
    }

    /// The movement awaiting the server, if any.
    pub fn pending_movement(&self) -> Option<Movement> {
        match self {
            Self::SendingMovement(movement) => Some(*movement),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("begin"),
            Self::GameStart => f.write_str("game start"),
            Self::PlayerTurn => f.write_str("player turn"),
            Self::OpponentTurn => f.write_str("opponent turn"),
            Self::SendingMovement(movement) => write!(f, "sending {movement}"),
            Self::GameEnd => f.write_str("game end"),
            Self::Forfeit => f.write_str("forfeit"),
            Self::ShutDown => f.write_str("shut down"),
        }
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// The piece the player is handling before a movement is sent.
///
/// Purely local; cleared whenever the session leaves `PlayerTurn`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub previously_selected: Option<Unit>,
    pub currently_selected: Option<Unit>,
    /// A movement found for the last drop, waiting for confirmation.
    pub awaiting_confirmation: Option<Movement>,
}

impl Selection {
    fn select(&mut self, unit: Unit) {
        self.previously_selected = self.currently_selected.replace(unit);
        self.awaiting_confirmation = None;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The last authoritative game state plus the local selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot<S> {
    /// `None` until the first state arrives.
    pub state: Option<S>,
    pub selection: Selection,
}

impl<S> Default for GameSnapshot<S> {
    fn default() -> Self {
        Self {
            state: None,
            selection: Selection::default(),
        }
    }
}

// ── Reconnect policy ────────────────────────────────────────────────

/// What to do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again; `attempt` counts from 1.
    Retry { attempt: u32 },
    /// The ceiling was reached.
    GiveUp,
}

/// Bounded count of consecutive reconnect attempts.
///
/// The count only grows within one disconnection episode and resets when a
/// connection is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: u32,
    ceiling: u32,
}

impl ReconnectPolicy {
    pub fn new(ceiling: u32) -> Self {
        Self {
            attempts: 0,
            ceiling,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Record a failure and decide whether to retry.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.attempts < self.ceiling {
            self.attempts += 1;
            ReconnectDecision::Retry {
                attempt: self.attempts,
            }
        } else {
            ReconnectDecision::GiveUp
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_CEILING)
    }
}

// ── Notices and actions ─────────────────────────────────────────────

/// A one-shot description of the opponent's last movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Narration {
    pub player: Player,
    pub movement: Movement,
}

impl Narration {
    pub fn kind(&self) -> MovementKind {
        self.movement.kind()
    }
}

impl fmt::Display for Narration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.movement {
            Movement::Pass => write!(f, "{} passed", self.player),
            Movement::Move { unit, to } => write!(f, "{} moved {unit} to {to}", self.player),
            Movement::Yoink { pillbug, unit, to } => {
                write!(f, "{} yoinked {unit} to {to} with {pillbug}", self.player)
            }
            Movement::Place { unit, to } => write!(f, "{} placed {unit} at {to}", self.player),
        }
    }
}

/// How a finished game ended for the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Draw,
}

/// Something the UI should tell the player. Never authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The opponent moved.
    Narration(Narration),
    /// Pass is the only legal move; acknowledge to submit it.
    MustPass,
    /// A drop matched an available movement; confirm or cancel it.
    ConfirmMovement(Movement),
    /// A drop matched no available movement.
    InvalidDrop {
        unit: Option<Unit>,
        position: Position,
    },
    /// The server rejected something.
    ServerError(ServerError),
    /// The connection dropped; another attempt is under way.
    Reconnecting { attempt: u32, ceiling: u32 },
    /// Every reconnect attempt failed; the match is forfeited.
    FailedToReconnect,
    /// The connection cannot be set up at all.
    Misconfigured(String),
    GameOver {
        winner: Option<UserId>,
        outcome: Outcome,
    },
    Forfeited { user: UserId, local: bool },
    Chat { user: UserId, text: String },
    PlayerJoined(UserId),
    PlayerLeft(UserId),
    PlayerReady { user: UserId, ready: bool },
    OptionChanged { key: OptionKey, value: bool },
}

impl Notice {
    /// Whether losing this notice would leave the player stuck or uninformed
    /// about the end of the match.
    pub fn must_deliver(&self) -> bool {
        matches!(
            self,
            Self::MustPass
                | Self::ConfirmMovement(_)
                | Self::FailedToReconnect
                | Self::Misconfigured(_)
                | Self::GameOver { .. }
                | Self::Forfeited { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Narration(narration) => write!(f, "{narration}"),
            Self::MustPass => f.write_str("You have no moves left and must pass."),
            Self::ConfirmMovement(movement) => write!(f, "Confirm {movement}?"),
            Self::InvalidDrop { .. } => f.write_str("That piece can't go there."),
            Self::ServerError(error) => f.write_str(error.advisory()),
            Self::Reconnecting { attempt, ceiling } => {
                write!(f, "Connection lost, reconnecting ({attempt}/{ceiling})...")
            }
            Self::FailedToReconnect => f.write_str("Failed to reconnect. The match was forfeited."),
            Self::Misconfigured(detail) => write!(f, "Cannot connect: {detail}"),
            Self::GameOver { outcome, .. } => match outcome {
                Outcome::Won => f.write_str("You won!"),
                Outcome::Lost => f.write_str("You lost."),
                Outcome::Draw => f.write_str("It's a draw."),
            },
            Self::Forfeited { local: true, .. } => f.write_str("You forfeited the match."),
            Self::Forfeited { local: false, .. } => f.write_str("Your opponent forfeited."),
            Self::Chat { text, .. } => f.write_str(text),
            Self::PlayerJoined(_) => f.write_str("A player joined."),
            Self::PlayerLeft(_) => f.write_str("A player left."),
            Self::PlayerReady { ready: true, .. } => f.write_str("A player is ready."),
            Self::PlayerReady { ready: false, .. } => f.write_str("A player is no longer ready."),
            Self::OptionChanged { key, value } => write!(f, "{key} set to {value}"),
        }
    }
}

/// Work recorded by the session for its owner to carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send a message on the current connection.
    Send(ClientMessage),
    /// Start a fresh connection attempt.
    Reconnect,
    /// Close the connection.
    Close,
    /// Show a notice.
    Notify(Notice),
}

// ── Configuration ───────────────────────────────────────────────────

/// Who confirms movements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayMode {
    /// A drop asks for confirmation first.
    #[default]
    Human,
    /// A drop is submitted straight away, and forced passes are played
    /// without an advisory round-trip.
    Agent,
}

/// Configuration for a [`GameSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The local user's id, used to tell own events from the opponent's.
    pub local_user: UserId,
    /// The side the local user plays.
    pub local_player: Player,
    /// Consecutive reconnect attempts tolerated before forfeiting.
    ///
    /// Defaults to **5**.
    pub reconnect_ceiling: u32,
    /// Defaults to [`PlayMode::Human`].
    pub play_mode: PlayMode,
}

impl SessionConfig {
    pub fn new(local_user: UserId, local_player: Player) -> Self {
        Self {
            local_user,
            local_player,
            reconnect_ceiling: DEFAULT_RECONNECT_CEILING,
            play_mode: PlayMode::Human,
        }
    }

    #[must_use]
    pub fn with_reconnect_ceiling(mut self, ceiling: u32) -> Self {
        self.reconnect_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_play_mode(mut self, mode: PlayMode) -> Self {
        self.play_mode = mode;
        self
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// A copy-out view of a session, for readers other than its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView<S> {
    pub state: SessionState,
    pub snapshot: GameSnapshot<S>,
    pub reconnect_attempts: u32,
    pub options: BTreeMap<OptionKey, bool>,
    pub ready: HashMap<UserId, bool>,
    pub participants: BTreeSet<UserId>,
    pub must_pass: bool,
    /// Whether the connection is up as far as the session knows.
    pub connected: bool,
    /// Messages held back until the connection is up again.
    pub held_messages: usize,
}

/// The turn state machine of one match.
#[derive(Debug)]
pub struct GameSession<S> {
    config: SessionConfig,
    state: SessionState,
    snapshot: GameSnapshot<S>,
    reconnect: ReconnectPolicy,
    must_pass: bool,
    options: BTreeMap<OptionKey, bool>,
    ready: HashMap<UserId, bool>,
    participants: BTreeSet<UserId>,
    actions: Vec<SessionAction>,
    link_up: bool,
    outbox: VecDeque<ClientMessage>,
    /// The pending movement was handed to the connection.
    movement_on_wire: bool,
    /// The pending movement went out on a connection that has since failed.
    movement_in_doubt: bool,
}

impl<S: GameState> GameSession<S> {
    pub fn new(config: SessionConfig) -> Self {
        let reconnect = ReconnectPolicy::new(config.reconnect_ceiling);
        Self {
            config,
            state: SessionState::Begin,
            snapshot: GameSnapshot::default(),
            reconnect,
            must_pass: false,
            options: BTreeMap::new(),
            ready: HashMap::new(),
            participants: BTreeSet::new(),
            actions: Vec::new(),
            link_up: false,
            outbox: VecDeque::new(),
            movement_on_wire: false,
            movement_in_doubt: false,
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> &GameSnapshot<S> {
        &self.snapshot
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    /// Whether a must-pass advisory is waiting for acknowledgement.
    pub fn must_pass(&self) -> bool {
        self.must_pass
    }

    pub fn option(&self, key: OptionKey) -> Option<bool> {
        self.options.get(&key).copied()
    }

    pub fn is_ready(&self, user: UserId) -> bool {
        self.ready.get(&user).copied().unwrap_or(false)
    }

    pub fn participants(&self) -> &BTreeSet<UserId> {
        &self.participants
    }

    pub fn view(&self) -> SessionView<S> {
        SessionView {
            state: self.state,
            snapshot: self.snapshot.clone(),
            reconnect_attempts: self.reconnect.attempts(),
            options: self.options.clone(),
            ready: self.ready.clone(),
            participants: self.participants.clone(),
            must_pass: self.must_pass,
            connected: self.link_up,
            held_messages: self.outbox.len(),
        }
    }

    /// Whether the connection is up as far as the session knows.
    pub fn is_connected(&self) -> bool {
        self.link_up
    }

    /// Drain the actions recorded since the last call.
    pub fn take_actions(&mut self) -> Vec<SessionAction> {
        std::mem::take(&mut self.actions)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Move to `next` if the table allows it. Returns whether it did.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(&next) {
            debug!(from = %self.state, to = %next, "transition rejected");
            return false;
        }
        debug!(from = %self.state, to = %next, "transition");
        if self.state == SessionState::PlayerTurn && next != SessionState::PlayerTurn {
            self.snapshot.selection.clear();
            self.must_pass = false;
        }
        if self.state.pending_movement().is_some() && next.pending_movement().is_none() {
            self.movement_on_wire = false;
            self.movement_in_doubt = false;
        }
        self.state = next;
        if next == SessionState::PlayerTurn {
            self.check_forced_pass();
        }
        true
    }

    fn push(&mut self, action: SessionAction) {
        self.actions.push(action);
    }

    fn notify(&mut self, notice: Notice) {
        self.push(SessionAction::Notify(notice));
    }

    /// Send `message`, or hold it until the next `Connected` while the link is down.
    fn send(&mut self, message: ClientMessage) {
        if !self.link_up {
            debug!(?message, "connection down, holding message");
            self.outbox.push_back(message);
            return;
        }
        if matches!(message, ClientMessage::Movement(_)) {
            self.movement_on_wire = true;
        }
        self.push(SessionAction::Send(message));
    }

    /// Hand back a message the connection refused. It goes out again, in
    /// order, after the next `Connected`.
    pub fn requeue(&mut self, message: ClientMessage) {
        if matches!(message, ClientMessage::Movement(_)) {
            self.movement_on_wire = false;
        }
        self.link_lost();
        self.outbox.push_back(message);
    }

    fn link_established(&mut self) {
        self.link_up = true;
        let held: Vec<_> = self.outbox.drain(..).collect();
        if !held.is_empty() {
            info!(count = held.len(), "sending held messages");
        }
        for message in held {
            self.send(message);
        }
    }

    fn link_lost(&mut self) {
        self.link_up = false;
        if self.movement_on_wire {
            self.movement_in_doubt = true;
        }
    }

    fn is_local_turn(&self) -> bool {
        self.snapshot
            .state
            .as_ref()
            .is_some_and(|s| s.current_player() == self.config.local_player)
    }

    /// Raise the must-pass advisory when `Pass` is the only legal move.
    fn check_forced_pass(&mut self) {
        if self.must_pass || !self.is_local_turn() {
            return;
        }
        let forced = self
            .snapshot
            .state
            .as_ref()
            .is_some_and(|s| s.available_moves() == [Movement::Pass]);
        if !forced {
            return;
        }
        info!("only a pass is available");
        match self.config.play_mode {
            PlayMode::Human => {
                self.must_pass = true;
                self.notify(Notice::MustPass);
            }
            PlayMode::Agent => self.submit(Movement::Pass),
        }
    }

    /// Move to the state the current snapshot calls for.
    fn advance(&mut self) {
        let Some(game) = self.snapshot.state.as_ref() else {
            return;
        };
        let target = if game.has_game_ended() {
            SessionState::GameEnd
        } else if game.current_player() == self.config.local_player {
            SessionState::PlayerTurn
        } else {
            SessionState::OpponentTurn
        };
        if target != self.state {
            self.transition(target);
        }
    }

    // ── Connection events ───────────────────────────────────────────

    /// Feed one item of the connection's event stream.
    pub fn handle_event(&mut self, event: EventResult<S>) {
        match event {
            Ok(ConnectionEvent::Connected | ConnectionEvent::AlreadyConnected) => {
                if self.reconnect.attempts() > 0 {
                    info!(attempts = self.reconnect.attempts(), "reconnected");
                }
                self.reconnect.reset();
                self.link_established();
                if self.state == SessionState::Begin {
                    self.transition(SessionState::GameStart);
                    self.advance();
                }
            }
            Ok(ConnectionEvent::Closed { reason, code }) => {
                self.link_lost();
                if code == CLOSE_NORMAL || self.state.is_settled() {
                    debug!(code, reason = %reason, "connection closed");
                } else {
                    warn!(code, reason = %reason, "connection closed unexpectedly");
                    self.on_transport_failure();
                }
            }
            Ok(ConnectionEvent::Message(message)) => self.handle_message(message),
            Err(e) if e.is_configuration() => {
                self.link_lost();
                warn!("connection misconfigured: {e}");
                self.notify(Notice::Misconfigured(e.to_string()));
            }
            Err(e) => {
                self.link_lost();
                warn!("connection failed: {e}");
                self.on_transport_failure();
            }
        }
    }

    fn on_transport_failure(&mut self) {
        if self.state.is_settled() {
            return;
        }
        match self.reconnect.on_failure() {
            ReconnectDecision::Retry { attempt } => {
                let ceiling = self.reconnect.ceiling();
                info!(attempt, ceiling, "reconnecting");
                self.notify(Notice::Reconnecting { attempt, ceiling });
                self.push(SessionAction::Reconnect);
            }
            ReconnectDecision::GiveUp => {
                warn!("reconnect attempts exhausted, forfeiting");
                self.notify(Notice::FailedToReconnect);
                self.transition(SessionState::Forfeit);
                self.push(SessionAction::Close);
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage<S>) {
        match message {
            ServerMessage::GameState(state) => self.on_game_state(state),
            ServerMessage::SetOption(key, value) => {
                self.options.insert(key, value);
                self.notify(Notice::OptionChanged { key, value });
            }
            ServerMessage::PlayerReady(user, ready) => {
                self.ready.insert(user, ready);
                self.notify(Notice::PlayerReady { user, ready });
            }
            ServerMessage::PlayerJoined(user) => {
                self.participants.insert(user);
                self.notify(Notice::PlayerJoined(user));
            }
            ServerMessage::PlayerLeft(user) => {
                self.participants.remove(&user);
                self.ready.remove(&user);
                self.notify(Notice::PlayerLeft(user));
            }
            ServerMessage::Chat(user, text) => self.notify(Notice::Chat { user, text }),
            ServerMessage::Forfeit(user) => {
                let local = user == self.config.local_user;
                info!(%user, local, "match forfeited");
                self.notify(Notice::Forfeited { user, local });
                self.transition(SessionState::Forfeit);
            }
            ServerMessage::GameOver(winner) => {
                let outcome = match winner {
                    None => Outcome::Draw,
                    Some(user) if user == self.config.local_user => Outcome::Won,
                    Some(_) => Outcome::Lost,
                };
                info!(?outcome, "game over");
                self.notify(Notice::GameOver { winner, outcome });
                self.transition(SessionState::GameEnd);
            }
            ServerMessage::Error(error) => {
                warn!(%error, "server reported an error");
                self.notify(Notice::ServerError(error));
            }
        }
    }

    fn on_game_state(&mut self, state: S) {
        let in_doubt = std::mem::take(&mut self.movement_in_doubt);
        let duplicate = self
            .snapshot
            .state
            .as_ref()
            .is_some_and(|old| old.last_update() == state.last_update());
        if duplicate {
            debug!("state push repeats the last update, ignoring");
            if self.state == SessionState::GameStart {
                self.advance();
            }
            // The server never saw the movement sent before the link failed.
            if let (true, Some(movement)) = (in_doubt, self.state.pending_movement()) {
                info!(%movement, "movement lost with the previous connection, sending again");
                self.send_movement(movement);
            }
            return;
        }

        if let Some(record) = state.last_update() {
            if record.player != self.config.local_player {
                self.notify(Notice::Narration(Narration {
                    player: record.player,
                    movement: record.movement,
                }));
            }
        }

        self.snapshot.state = Some(state);
        if self.state != SessionState::Begin {
            self.advance();
        }
    }

    // ── Player intents ──────────────────────────────────────────────

    /// Pick up a unit from the hand or the board.
    pub fn select(&mut self, unit: Unit) {
        if self.state != SessionState::PlayerTurn {
            debug!(state = %self.state, "selection outside the player's turn ignored");
            return;
        }
        self.snapshot.selection.select(unit);
    }

    /// Drop the selected unit on `position`.
    pub fn drop_on(&mut self, position: Position) {
        if self.state != SessionState::PlayerTurn {
            return;
        }
        let unit = self.snapshot.selection.currently_selected;
        let found = unit.and_then(|unit| {
            self.snapshot.state.as_ref().and_then(|game| {
                game.available_moves()
                    .iter()
                    .find(|m| m.moved_unit() == Some(unit) && m.target_position() == Some(position))
                    .copied()
            })
        });

        let Some(movement) = found else {
            debug!(?unit, %position, "drop matches no available movement");
            self.notify(Notice::InvalidDrop { unit, position });
            return;
        };

        match self.config.play_mode {
            PlayMode::Human => {
                self.snapshot.selection.awaiting_confirmation = Some(movement);
                self.notify(Notice::ConfirmMovement(movement));
            }
            PlayMode::Agent => self.submit(movement),
        }
    }

    /// Send the movement found by the last drop.
    pub fn confirm_movement(&mut self) {
        if self.state != SessionState::PlayerTurn {
            return;
        }
        if let Some(movement) = self.snapshot.selection.awaiting_confirmation {
            self.submit(movement);
        }
    }

    /// Put the selected unit back without contacting the server.
    pub fn cancel_movement(&mut self) {
        let selection = &mut self.snapshot.selection;
        selection.currently_selected = None;
        selection.awaiting_confirmation = None;
    }

    /// Dismiss the must-pass advisory, which submits the pass.
    pub fn acknowledge_pass(&mut self) {
        if !self.must_pass || self.state != SessionState::PlayerTurn {
            return;
        }
        self.must_pass = false;
        self.submit(Movement::Pass);
    }

    /// Submit `movement` directly if it is available. Returns whether it was sent.
    pub fn play(&mut self, movement: Movement) -> bool {
        if self.state != SessionState::PlayerTurn {
            return false;
        }
        let available = self
            .snapshot
            .state
            .as_ref()
            .is_some_and(|game| game.available_moves().contains(&movement));
        if !available {
            return false;
        }
        self.submit(movement);
        self.state == SessionState::SendingMovement(movement)
    }

    fn submit(&mut self, movement: Movement) {
        let expressible = self
            .snapshot
            .state
            .as_ref()
            .is_some_and(|game| game.relative_movement(&movement).is_some());
        if !expressible {
            warn!(%movement, "engine cannot express movement in notation");
            return;
        }
        if self.transition(SessionState::SendingMovement(movement)) {
            info!(%movement, "sending movement");
            self.send_movement(movement);
        }
    }

    fn send_movement(&mut self, movement: Movement) {
        let relative = self
            .snapshot
            .state
            .as_ref()
            .and_then(|game| game.relative_movement(&movement));
        if let Some(relative) = relative {
            self.send(ClientMessage::Movement(relative));
        }
    }

    /// Concede the match. Only meaningful while in game.
    pub fn forfeit(&mut self) {
        if !self.state.in_game() {
            debug!(state = %self.state, "forfeit outside a game ignored");
            return;
        }
        self.send(ClientMessage::Forfeit);
        self.transition(SessionState::Forfeit);
    }

    pub fn set_option(&mut self, key: OptionKey, value: bool) {
        if self.state.is_terminal() {
            return;
        }
        self.send(ClientMessage::SetOption(key, value));
    }

    pub fn ready(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.send(ClientMessage::ReadyToPlay);
    }

    pub fn chat(&mut self, text: impl Into<String>) {
        if self.state == SessionState::ShutDown {
            return;
        }
        self.send(ClientMessage::Chat(text.into()));
    }

    /// Tear the session down. Safe to call repeatedly.
    pub fn shut_down(&mut self) {
        if self.transition(SessionState::ShutDown) {
            info!("session shut down");
            self.push(SessionAction::Close);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::engine::{StateSnapshot, UnitClass};
    use crate::error::ConnectionError;
    use crate::error_codes::ErrorCode;
    use crate::event::CLOSE_ABNORMAL;

    const ME: UserId = UserId::from_u128(1);
    const THEM: UserId = UserId::from_u128(2);

    fn all_states() -> Vec<SessionState> {
        vec![
            SessionState::Begin,
            SessionState::GameStart,
            SessionState::PlayerTurn,
            SessionState::OpponentTurn,
            SessionState::SendingMovement(Movement::Pass),
            SessionState::GameEnd,
            SessionState::Forfeit,
            SessionState::ShutDown,
        ]
    }

    fn allowed(from: &SessionState, to: &SessionState) -> bool {
        use SessionState::*;
        let listed = matches!(
            (from, to),
            (Begin, GameStart)
                | (GameStart, PlayerTurn | OpponentTurn)
                | (PlayerTurn, SendingMovement(_))
                | (SendingMovement(_), OpponentTurn | GameEnd)
                | (OpponentTurn, PlayerTurn | GameEnd)
        );
        match (from, to) {
            (ShutDown, _) => false,
            (_, ShutDown) => true,
            (Forfeit, _) => false,
            (_, Forfeit) => true,
            _ => listed,
        }
    }

    fn ant(index: u8) -> Unit {
        Unit::new(Player::White, UnitClass::Ant, index)
    }

    fn place(index: u8, to: Position) -> Movement {
        Movement::Place {
            unit: ant(index),
            to,
        }
    }

    fn session() -> GameSession<StateSnapshot> {
        GameSession::new(SessionConfig::new(ME, Player::White))
    }

    fn state_msg(state: StateSnapshot) -> EventResult<StateSnapshot> {
        Ok(ConnectionEvent::Message(ServerMessage::GameState(state)))
    }

    fn notices(actions: &[SessionAction]) -> Vec<&Notice> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// A session that reached `PlayerTurn` on `state`.
    fn playing(state: StateSnapshot) -> GameSession<StateSnapshot> {
        let mut s = session();
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.handle_event(state_msg(state));
        s
    }

    fn opening() -> StateSnapshot {
        StateSnapshot::new()
            .with_moves(Player::White, vec![place(1, Position::ORIGIN)])
            .with_moves(Player::Black, vec![Movement::Pass])
    }

    // ── Transition table ────────────────────────────────────────────

    #[test]
    fn transition_table_is_complete() {
        for from in all_states() {
            for to in all_states() {
                let mut s = session();
                s.state = from;
                let moved = s.transition(to);
                assert_eq!(moved, allowed(&from, &to), "{from} -> {to}");
                let expected = if moved { to } else { from };
                assert_eq!(s.state(), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn begin_to_player_turn_then_game_start_is_rejected() {
        let mut s = session();
        assert!(s.transition(SessionState::GameStart));
        assert_eq!(s.state(), SessionState::GameStart);
        assert!(s.transition(SessionState::PlayerTurn));
        assert!(!s.transition(SessionState::GameStart));
        assert_eq!(s.state(), SessionState::PlayerTurn);
    }

    #[test]
    fn forfeit_blocks_everything_but_shutdown() {
        let mut s = session();
        assert!(s.transition(SessionState::Forfeit));
        for next in all_states() {
            if next == SessionState::ShutDown {
                continue;
            }
            assert!(!s.transition(next));
        }
        assert!(s.transition(SessionState::ShutDown));
    }

    // ── Reconnect ───────────────────────────────────────────────────

    fn failure() -> EventResult<StateSnapshot> {
        Err(ConnectionError::FailedToConnect("refused".into()))
    }

    fn reconnects(actions: &[SessionAction]) -> usize {
        actions
            .iter()
            .filter(|a| **a == SessionAction::Reconnect)
            .count()
    }

    #[test]
    fn sixth_consecutive_failure_forfeits() {
        let mut s = playing(opening());
        s.take_actions();

        for attempt in 1..=5 {
            s.handle_event(failure());
            let actions = s.take_actions();
            assert_eq!(reconnects(&actions), 1, "attempt {attempt}");
            assert_eq!(s.reconnect_policy().attempts(), attempt);
            assert_eq!(s.state(), SessionState::PlayerTurn);
        }

        s.handle_event(failure());
        let actions = s.take_actions();
        assert_eq!(reconnects(&actions), 0);
        assert!(notices(&actions).contains(&&Notice::FailedToReconnect));
        assert!(actions.contains(&SessionAction::Close));
        assert_eq!(s.state(), SessionState::Forfeit);
    }

    #[test]
    fn connected_after_third_attempt_resets_the_counter() {
        let mut s = playing(opening());
        for _ in 0..3 {
            s.handle_event(failure());
        }
        assert_eq!(s.reconnect_policy().attempts(), 3);

        s.handle_event(Ok(ConnectionEvent::Connected));
        assert_eq!(s.reconnect_policy().attempts(), 0);
        s.take_actions();

        for _ in 0..5 {
            s.handle_event(failure());
        }
        assert_eq!(reconnects(&s.take_actions()), 5);
        assert_eq!(s.state(), SessionState::PlayerTurn);

        s.handle_event(failure());
        assert_eq!(s.state(), SessionState::Forfeit);
    }

    #[test]
    fn abnormal_close_counts_as_failure_but_normal_close_does_not() {
        let mut s = playing(opening());
        s.take_actions();
        s.handle_event(Ok(ConnectionEvent::Closed {
            reason: "bye".into(),
            code: CLOSE_NORMAL,
        }));
        assert!(s.take_actions().is_empty());

        s.handle_event(Ok(ConnectionEvent::Closed {
            reason: "lost".into(),
            code: CLOSE_ABNORMAL,
        }));
        assert_eq!(reconnects(&s.take_actions()), 1);
    }

    #[test]
    fn configuration_errors_are_not_retried() {
        let mut s = session();
        s.handle_event(Err(ConnectionError::UsingOfflineAccount));
        let actions = s.take_actions();
        assert_eq!(reconnects(&actions), 0);
        assert!(matches!(notices(&actions).as_slice(), [Notice::Misconfigured(_)]));
        assert_eq!(s.reconnect_policy().attempts(), 0);
        assert_eq!(s.state(), SessionState::Begin);
    }

    #[test]
    fn failures_after_the_game_ended_are_ignored() {
        let mut s = playing(opening());
        s.state = SessionState::GameEnd;
        s.take_actions();
        s.handle_event(failure());
        assert!(s.take_actions().is_empty());
    }

    // ── Movement ────────────────────────────────────────────────────

    #[test]
    fn drop_on_available_target_reaches_sending_movement() {
        let mut s = playing(opening());
        assert_eq!(s.state(), SessionState::PlayerTurn);
        s.take_actions();

        s.select(ant(1));
        s.drop_on(Position::new(0, 0, 0));
        let movement = place(1, Position::ORIGIN);
        assert_eq!(
            s.take_actions(),
            vec![SessionAction::Notify(Notice::ConfirmMovement(movement))]
        );
        assert_eq!(s.state(), SessionState::PlayerTurn);

        s.confirm_movement();
        assert_eq!(s.state(), SessionState::SendingMovement(movement));
        assert_eq!(
            s.take_actions(),
            vec![SessionAction::Send(ClientMessage::Movement(
                crate::engine::RelativeMovement::new("place wA1 0,0,0")
            ))]
        );
        assert_eq!(s.snapshot().selection, Selection::default());
    }

    #[test]
    fn drop_on_unavailable_target_changes_nothing() {
        let mut s = playing(opening());
        s.take_actions();
        s.select(ant(1));
        s.drop_on(Position::new(1, 1, -2));

        assert_eq!(s.state(), SessionState::PlayerTurn);
        let actions = s.take_actions();
        assert!(matches!(
            notices(&actions).as_slice(),
            [Notice::InvalidDrop { position, .. }] if *position == Position::new(1, 1, -2)
        ));
        assert_eq!(s.snapshot().selection.currently_selected, Some(ant(1)));
    }

    #[test]
    fn cancel_clears_selection_without_sending() {
        let mut s = playing(opening());
        s.select(ant(2));
        s.select(ant(1));
        assert_eq!(s.snapshot().selection.previously_selected, Some(ant(2)));
        s.drop_on(Position::ORIGIN);
        s.take_actions();

        s.cancel_movement();
        s.confirm_movement();
        assert!(s.take_actions().is_empty());
        assert_eq!(s.snapshot().selection.currently_selected, None);
        assert_eq!(s.state(), SessionState::PlayerTurn);
    }

    #[test]
    fn agent_mode_submits_drops_directly() {
        let mut s = GameSession::new(
            SessionConfig::new(ME, Player::White).with_play_mode(PlayMode::Agent),
        );
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.handle_event(state_msg(opening()));
        s.select(ant(1));
        s.drop_on(Position::ORIGIN);
        assert_eq!(
            s.state(),
            SessionState::SendingMovement(place(1, Position::ORIGIN))
        );
    }

    #[test]
    fn second_movement_waits_for_the_first() {
        let mut s = playing(opening());
        assert!(s.play(place(1, Position::ORIGIN)));
        assert!(!s.play(place(1, Position::ORIGIN)));
        let sends = s
            .take_actions()
            .into_iter()
            .filter(|a| matches!(a, SessionAction::Send(_)))
            .count();
        assert_eq!(sends, 1);
    }

    // ── Forced pass ─────────────────────────────────────────────────

    #[test]
    fn forced_pass_raises_one_advisory_then_submits_pass() {
        let only_pass = StateSnapshot::new().with_moves(Player::White, vec![Movement::Pass]);
        let mut s = playing(only_pass.clone());

        // A repeated push must not raise the advisory twice.
        s.handle_event(state_msg(only_pass));
        let actions = s.take_actions();
        let must_pass = notices(&actions)
            .into_iter()
            .filter(|n| **n == Notice::MustPass)
            .count();
        assert_eq!(must_pass, 1);
        assert!(s.must_pass());

        s.acknowledge_pass();
        assert_eq!(s.state(), SessionState::SendingMovement(Movement::Pass));
        assert_eq!(
            s.take_actions(),
            vec![SessionAction::Send(ClientMessage::Movement(
                crate::engine::RelativeMovement::new("pass")
            ))]
        );

        // Acknowledging again does nothing.
        s.acknowledge_pass();
        assert!(s.take_actions().is_empty());
    }

    // ── Game states ─────────────────────────────────────────────────

    #[test]
    fn opponent_move_is_narrated_and_hands_over_the_turn() {
        let black_first = StateSnapshot::new()
            .with_current_player(Player::Black)
            .with_moves(Player::White, vec![place(1, Position::ORIGIN)]);
        let mut s = playing(black_first.clone());
        assert_eq!(s.state(), SessionState::OpponentTurn);
        s.take_actions();

        let black_ant = Unit::new(Player::Black, UnitClass::Ant, 1);
        let moved = Movement::Place {
            unit: black_ant,
            to: Position::new(1, -1, 0),
        };
        s.handle_event(state_msg(
            black_first
                .with_current_player(Player::White)
                .with_update(Player::Black, moved),
        ));

        assert_eq!(s.state(), SessionState::PlayerTurn);
        let actions = s.take_actions();
        let [Notice::Narration(narration)] = notices(&actions).as_slice() else {
            panic!("expected one narration, got {actions:?}");
        };
        assert_eq!(narration.kind(), MovementKind::Place);
        assert_eq!(narration.to_string(), "Black placed bA1 at 1,-1,0");
    }

    #[test]
    fn duplicate_state_is_a_no_op() {
        let mut s = playing(opening());
        s.select(ant(1));
        s.take_actions();
        s.handle_event(state_msg(opening()));
        assert!(s.take_actions().is_empty());
        assert_eq!(s.snapshot().selection.currently_selected, Some(ant(1)));
    }

    #[test]
    fn own_move_then_end_of_game() {
        let mut s = playing(opening());
        let movement = place(1, Position::ORIGIN);
        assert!(s.play(movement));

        let mut after = opening();
        assert!(after.apply(&movement));
        assert!(after.has_game_ended());
        s.handle_event(state_msg(after));
        assert_eq!(s.state(), SessionState::GameEnd);

        s.handle_event(Ok(ConnectionEvent::Message(ServerMessage::GameOver(None))));
        let actions = s.take_actions();
        assert!(notices(&actions).contains(&&Notice::GameOver {
            winner: None,
            outcome: Outcome::Draw
        }));
    }

    #[test]
    fn state_before_connected_waits_in_begin() {
        let mut s = session();
        s.handle_event(state_msg(opening()));
        assert_eq!(s.state(), SessionState::Begin);
        s.handle_event(Ok(ConnectionEvent::AlreadyConnected));
        assert_eq!(s.state(), SessionState::PlayerTurn);
    }

    // ── Server messages and intents ─────────────────────────────────

    #[test]
    fn server_error_is_advisory_only() {
        let mut s = playing(opening());
        s.take_actions();
        let error = ServerError::new(Some(ME), ErrorCode::NotPlayerTurn, "");
        s.handle_event(Ok(ConnectionEvent::Message(ServerMessage::Error(error.clone()))));
        assert_eq!(s.state(), SessionState::PlayerTurn);
        let actions = s.take_actions();
        assert_eq!(
            actions,
            vec![SessionAction::Notify(Notice::ServerError(error))]
        );
        assert_eq!(notices(&actions)[0].to_string(), "It's not your turn.");
    }

    #[test]
    fn forfeit_only_while_in_game() {
        let mut s = session();
        s.forfeit();
        assert!(s.take_actions().is_empty());
        assert_eq!(s.state(), SessionState::Begin);

        let mut s = playing(opening());
        s.take_actions();
        s.forfeit();
        assert_eq!(s.state(), SessionState::Forfeit);
        assert_eq!(
            s.take_actions(),
            vec![SessionAction::Send(ClientMessage::Forfeit)]
        );
    }

    #[test]
    fn opponent_forfeit_ends_the_match() {
        let mut s = playing(opening());
        s.take_actions();
        s.handle_event(Ok(ConnectionEvent::Message(ServerMessage::Forfeit(THEM))));
        assert_eq!(s.state(), SessionState::Forfeit);
        assert_eq!(
            s.take_actions(),
            vec![SessionAction::Notify(Notice::Forfeited {
                user: THEM,
                local: false
            })]
        );
    }

    #[test]
    fn bookkeeping_tracks_options_readiness_and_presence() {
        let mut s = session();
        let msg = |m: ServerMessage<StateSnapshot>| -> EventResult<StateSnapshot> {
            Ok(ConnectionEvent::Message(m))
        };
        s.handle_event(msg(ServerMessage::SetOption(OptionKey::Ladybug, true)));
        s.handle_event(msg(ServerMessage::PlayerJoined(THEM)));
        s.handle_event(msg(ServerMessage::PlayerReady(THEM, true)));
        assert_eq!(s.option(OptionKey::Ladybug), Some(true));
        assert_eq!(s.option(OptionKey::Mosquito), None);
        assert!(s.is_ready(THEM));
        assert!(s.participants().contains(&THEM));

        s.handle_event(msg(ServerMessage::PlayerLeft(THEM)));
        assert!(!s.is_ready(THEM));
        assert!(s.participants().is_empty());
        assert_eq!(notices(&s.take_actions()).len(), 4);
    }

    #[test]
    fn shut_down_is_idempotent() {
        let mut s = playing(opening());
        s.take_actions();
        s.shut_down();
        s.shut_down();
        assert_eq!(s.take_actions(), vec![SessionAction::Close]);
        assert_eq!(s.state(), SessionState::ShutDown);
    }

    #[test]
    fn lobby_intents_are_sent() {
        let mut s = session();
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.take_actions();
        s.set_option(OptionKey::Pillbug, true);
        s.ready();
        s.chat("glhf");
        assert_eq!(
            s.take_actions(),
            vec![
                SessionAction::Send(ClientMessage::SetOption(OptionKey::Pillbug, true)),
                SessionAction::Send(ClientMessage::ReadyToPlay),
                SessionAction::Send(ClientMessage::Chat("glhf".into())),
            ]
        );
    }

    // ── Link loss ───────────────────────────────────────────────────

    fn sends(actions: &[SessionAction]) -> Vec<&ClientMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn mov(notation: &str) -> ClientMessage {
        ClientMessage::Movement(crate::engine::RelativeMovement::new(notation))
    }

    #[test]
    fn intents_before_connected_are_held_then_sent_in_order() {
        let mut s = session();
        s.ready();
        s.chat("hi");
        assert!(s.take_actions().is_empty());
        assert_eq!(s.view().held_messages, 2);

        s.handle_event(Ok(ConnectionEvent::Connected));
        assert_eq!(
            sends(&s.take_actions()),
            vec![
                &ClientMessage::ReadyToPlay,
                &ClientMessage::Chat("hi".into())
            ]
        );
        assert!(s.is_connected());
        assert_eq!(s.view().held_messages, 0);
    }

    #[test]
    fn movement_played_while_reconnecting_goes_out_once_connected() {
        let mut s = playing(opening());
        s.handle_event(failure());
        s.take_actions();
        assert!(!s.is_connected());

        let movement = place(1, Position::ORIGIN);
        assert!(s.play(movement));
        assert_eq!(s.state(), SessionState::SendingMovement(movement));
        assert!(sends(&s.take_actions()).is_empty());

        s.handle_event(Ok(ConnectionEvent::Connected));
        assert_eq!(sends(&s.take_actions()), vec![&mov("place wA1 0,0,0")]);

        // The server repeats its state before reading the movement: no resend.
        s.handle_event(state_msg(opening()));
        assert!(sends(&s.take_actions()).is_empty());
        assert_eq!(s.state(), SessionState::SendingMovement(movement));
    }

    #[test]
    fn refused_message_is_requeued_for_the_next_connection() {
        let mut s = playing(opening());
        let movement = place(1, Position::ORIGIN);
        assert!(s.play(movement));
        let actions = s.take_actions();
        let [SessionAction::Send(message)] = actions.as_slice() else {
            panic!("expected one send, got {actions:?}");
        };
        s.requeue(message.clone());
        assert!(!s.is_connected());

        s.handle_event(failure());
        s.handle_event(Ok(ConnectionEvent::Connected));
        assert_eq!(sends(&s.take_actions()), vec![&mov("place wA1 0,0,0")]);
        s.handle_event(state_msg(opening()));
        assert!(sends(&s.take_actions()).is_empty());
    }

    #[test]
    fn movement_lost_with_the_link_is_sent_again() {
        let mut s = playing(opening());
        let movement = place(1, Position::ORIGIN);
        assert!(s.play(movement));
        s.take_actions();

        s.handle_event(Ok(ConnectionEvent::Closed {
            reason: "reset".into(),
            code: CLOSE_ABNORMAL,
        }));
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.take_actions();

        // Unchanged history: the movement never reached the server.
        s.handle_event(state_msg(opening()));
        assert_eq!(sends(&s.take_actions()), vec![&mov("place wA1 0,0,0")]);
        assert_eq!(s.state(), SessionState::SendingMovement(movement));
    }

    #[test]
    fn movement_that_landed_before_the_link_failed_is_not_resent() {
        let mut s = GameSession::new(SessionConfig::new(ME, Player::White));
        let start = StateSnapshot::new()
            .with_moves(Player::White, vec![place(1, Position::ORIGIN)])
            .with_moves(
                Player::Black,
                vec![Movement::Place {
                    unit: Unit::new(Player::Black, UnitClass::Ant, 1),
                    to: Position::new(1, -1, 0),
                }],
            );
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.handle_event(state_msg(start.clone()));
        let movement = place(1, Position::ORIGIN);
        assert!(s.play(movement));
        s.handle_event(failure());
        s.handle_event(Ok(ConnectionEvent::Connected));
        s.take_actions();

        let mut applied = start;
        assert!(applied.apply(&movement));
        s.handle_event(state_msg(applied));
        assert!(sends(&s.take_actions()).is_empty());
        assert_eq!(s.state(), SessionState::OpponentTurn);
    }
}
