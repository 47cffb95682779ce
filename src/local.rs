//! In-process connection manager for matches against a local opponent.
//!
//! [`LocalClient`] behaves like a server: it answers every
//! [`ClientMessage`] with the same [`ServerMessage`]s a game server would
//! produce, validated against the rules engine, and lets an [`Opponent`] play
//! the other side. The match survives `close`/`reconnect`, so a session can
//! drop the connection and resume where it left off.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{
    emit, Command, ConnectionManager, EventResult, Instance, TaskChannels,
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::engine::{GameState, Movement, Player};
use crate::error::{ConnectionError, Result};
use crate::error_codes::ErrorCode;
use crate::event::{ConnectionEvent, CLOSE_NORMAL};
use crate::protocol::{ClientMessage, ServerError, ServerMessage, UserId};

/// Picks the moves of the side the local user does not control.
pub trait Opponent<S>: Send {
    /// Choose one of `state`'s available moves, or `None` to give up the turn.
    fn choose(&mut self, state: &S) -> Option<Movement>;
}

/// An opponent that plays a uniformly random available move.
#[derive(Debug, Clone)]
pub struct RandomOpponent {
    rng: StdRng,
}

impl RandomOpponent {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// A deterministic opponent, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomOpponent {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GameState> Opponent<S> for RandomOpponent {
    fn choose(&mut self, state: &S) -> Option<Movement> {
        state.available_moves().choose(&mut self.rng).copied()
    }
}

/// Configuration for a [`LocalClient`].
pub struct LocalConfig<S> {
    /// State the match starts from.
    pub initial_state: S,
    /// Who plays the other side.
    pub opponent: Box<dyn Opponent<S>>,
    /// User id reported for the local player.
    pub local_user: UserId,
    /// User id reported for the opponent.
    pub opponent_user: UserId,
    /// The side the local user controls. Defaults to [`Player::White`].
    pub local_player: Player,
    /// Capacity of the bounded event channel. Defaults to **256**.
    pub event_channel_capacity: usize,
}

impl<S: GameState> LocalConfig<S> {
    /// A local match from `initial_state` against `opponent`, with random user ids.
    pub fn new(initial_state: S, opponent: impl Opponent<S> + 'static) -> Self {
        Self {
            initial_state,
            opponent: Box::new(opponent),
            local_user: Uuid::new_v4(),
            opponent_user: Uuid::new_v4(),
            local_player: Player::White,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_local_user(mut self, user: UserId) -> Self {
        self.local_user = user;
        self
    }

    #[must_use]
    pub fn with_opponent_user(mut self, user: UserId) -> Self {
        self.opponent_user = user;
        self
    }

    #[must_use]
    pub fn with_local_player(mut self, player: Player) -> Self {
        self.local_player = player;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

impl<S> std::fmt::Debug for LocalConfig<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConfig")
            .field("local_user", &self.local_user)
            .field("opponent_user", &self.opponent_user)
            .field("local_player", &self.local_player)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .finish_non_exhaustive()
    }
}

/// The authoritative match kept by a [`LocalClient`].
struct LocalMatch<S> {
    state: S,
    opponent: Box<dyn Opponent<S>>,
    local_user: UserId,
    opponent_user: UserId,
    local_player: Player,
    forfeited: bool,
}

impl<S: GameState> LocalMatch<S> {
    fn new(config: LocalConfig<S>) -> Self {
        Self {
            state: config.initial_state,
            opponent: config.opponent,
            local_user: config.local_user,
            opponent_user: config.opponent_user,
            local_player: config.local_player,
            forfeited: false,
        }
    }

    fn is_over(&self) -> bool {
        self.forfeited || self.state.has_game_ended()
    }

    fn user_of(&self, player: Player) -> UserId {
        if player == self.local_player {
            self.local_user
        } else {
            self.opponent_user
        }
    }

    fn reject(&self, code: ErrorCode) -> ServerMessage<S> {
        ServerMessage::Error(ServerError::new(
            Some(self.local_user),
            code,
            code.description(),
        ))
    }

    /// Messages pushed right after a (re)connect.
    fn on_connect(&mut self) -> Vec<ServerMessage<S>> {
        let mut out = vec![ServerMessage::GameState(self.state.clone())];
        self.play_opponent(&mut out);
        out
    }

    /// Answer one client message.
    fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage<S>> {
        let mut out = Vec::new();
        match message {
            ClientMessage::Movement(relative) => {
                if self.is_over() {
                    out.push(self.reject(ErrorCode::InvalidCommand));
                } else if self.state.current_player() != self.local_player {
                    out.push(self.reject(ErrorCode::NotPlayerTurn));
                } else {
                    match self.state.resolve(&relative) {
                        Some(movement) if self.state.apply(&movement) => {
                            debug!(%movement, "local player moved");
                            self.push_state(&mut out);
                            self.play_opponent(&mut out);
                        }
                        _ => out.push(self.reject(ErrorCode::InvalidMovement)),
                    }
                }
            }
            ClientMessage::SetOption(key, value) => {
                if self.state.last_update().is_some() {
                    out.push(self.reject(ErrorCode::OptionNonModifiable));
                } else {
                    out.push(ServerMessage::SetOption(key, value));
                }
            }
            ClientMessage::Chat(text) => out.push(ServerMessage::Chat(self.local_user, text)),
            ClientMessage::ReadyToPlay => out.push(ServerMessage::PlayerReady(self.local_user, true)),
            ClientMessage::Forfeit => {
                if self.is_over() {
                    out.push(self.reject(ErrorCode::InvalidCommand));
                } else {
                    info!("local player forfeited");
                    self.forfeited = true;
                    out.push(ServerMessage::Forfeit(self.local_user));
                    out.push(ServerMessage::GameOver(Some(self.opponent_user)));
                }
            }
        }
        out
    }

    /// Push the current state, followed by `GameOver` if it ended the game.
    fn push_state(&self, out: &mut Vec<ServerMessage<S>>) {
        out.push(ServerMessage::GameState(self.state.clone()));
        if self.state.has_game_ended() {
            let winner = self.state.winner().map(|player| self.user_of(player));
            info!(?winner, "local match over");
            out.push(ServerMessage::GameOver(winner));
        }
    }

    /// Let the opponent play until the turn returns to the local player.
    fn play_opponent(&mut self, out: &mut Vec<ServerMessage<S>>) {
        while !self.is_over() && self.state.current_player() != self.local_player {
            let Some(movement) = self.opponent.choose(&self.state) else {
                warn!("opponent has no move to play");
                return;
            };
            if !self.state.apply(&movement) {
                warn!(%movement, "opponent chose an unavailable move");
                return;
            }
            debug!(%movement, "opponent moved");
            self.push_state(out);
        }
    }
}

/// Connection manager that plays a match in-process.
pub struct LocalClient<S> {
    game: Option<Arc<Mutex<LocalMatch<S>>>>,
    capacity: usize,
    instance: Option<Instance<S>>,
}

impl<S: GameState> LocalClient<S> {
    /// An unprepared local client.
    pub fn new() -> Self {
        Self {
            game: None,
            capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            instance: None,
        }
    }

    /// Set up the match. Replaces any match prepared earlier.
    pub fn prepare(&mut self, config: LocalConfig<S>) {
        self.capacity = config.event_channel_capacity;
        self.game = Some(Arc::new(Mutex::new(LocalMatch::new(config))));
    }

    fn start_instance(&mut self) -> Result<()> {
        let game = self.game.as_ref().ok_or(ConnectionError::NotPrepared)?;
        let game = Arc::clone(game);
        debug!("starting local match connection");
        self.instance = Some(Instance::spawn(self.capacity, move |channels| {
            local_task(game, channels)
        }));
        Ok(())
    }
}

impl<S: GameState> Default for LocalClient<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for LocalClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClient")
            .field("prepared", &self.game.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: GameState> ConnectionManager<S> for LocalClient<S> {
    fn open_connection(&mut self) -> Result<()> {
        if self.game.is_none() {
            return Err(ConnectionError::NotPrepared);
        }
        if let Some(instance) = &self.instance {
            if instance.is_connected() {
                instance.announce_connected();
                return Ok(());
            }
            if instance.is_live() {
                return Ok(());
            }
        }
        self.start_instance()
    }

    fn reconnect(&mut self) -> Result<()> {
        if self.game.is_none() {
            return Err(ConnectionError::NotPrepared);
        }
        self.instance = None;
        self.start_instance()
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        match &self.instance {
            Some(instance) => instance.send(message),
            None => Err(ConnectionError::NotConnected),
        }
    }

    async fn next_event(&mut self) -> Option<EventResult<S>> {
        match self.instance.as_mut() {
            Some(instance) => instance.next_event().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
        }
    }
}

async fn local_task<S: GameState>(game: Arc<Mutex<LocalMatch<S>>>, channels: TaskChannels<S>) {
    let TaskChannels {
        mut cmd_rx,
        event_tx,
        mut shutdown_rx,
        connected,
    } = channels;

    connected.store(true, std::sync::atomic::Ordering::Release);
    emit(&event_tx, Ok(ConnectionEvent::Connected)).await;
    let opening = game.lock().await.on_connect();
    for message in opening {
        emit(&event_tx, Ok(ConnectionEvent::Message(message))).await;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(message)) => {
                        let replies = game.lock().await.handle(message);
                        for reply in replies {
                            emit(&event_tx, Ok(ConnectionEvent::Message(reply))).await;
                        }
                    }
                    Some(Command::AnnounceConnected) => {
                        emit(&event_tx, Ok(ConnectionEvent::AlreadyConnected)).await;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }

    connected.store(false, std::sync::atomic::Ordering::Release);
    let closed = ConnectionEvent::Closed {
        reason: "client closed".into(),
        code: CLOSE_NORMAL,
    };
    emit(&event_tx, Ok(closed)).await;
    debug!("local match connection closed");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::engine::{Position, RelativeMovement, StateSnapshot, Unit, UnitClass};
    use crate::protocol::OptionKey;

    fn place(owner: Player, index: u8, x: i32) -> Movement {
        Movement::Place {
            unit: Unit::new(owner, UnitClass::Ant, index),
            to: Position::new(x, -x, 0),
        }
    }

    fn opening() -> StateSnapshot {
        StateSnapshot::new()
            .with_moves(Player::White, vec![place(Player::White, 1, 0), place(Player::White, 2, 1)])
            .with_moves(Player::Black, vec![place(Player::Black, 1, 2), Movement::Pass])
    }

    fn local_match(state: StateSnapshot) -> LocalMatch<StateSnapshot> {
        LocalMatch::new(
            LocalConfig::new(state, RandomOpponent::seeded(7))
                .with_local_user(UserId::from_u128(1))
                .with_opponent_user(UserId::from_u128(2)),
        )
    }

    fn notation(movement: Movement) -> ClientMessage {
        ClientMessage::Movement(RelativeMovement::new(movement.to_string()))
    }

    #[test]
    fn valid_move_is_answered_by_the_opponent() {
        let mut game = local_match(opening());
        let replies = game.handle(notation(place(Player::White, 1, 0)));

        // Own move, then the opponent's reply.
        assert_eq!(replies.len(), 2);
        assert!(matches!(&replies[0], ServerMessage::GameState(s) if s.current_player == Player::Black));
        let ServerMessage::GameState(after) = &replies[1] else {
            panic!("expected a state, got {:?}", replies[1]);
        };
        assert_eq!(after.current_player, Player::White);
        assert_eq!(after.updates.len(), 2);
    }

    #[test]
    fn unknown_move_is_rejected() {
        let mut game = local_match(opening());
        let replies = game.handle(ClientMessage::Movement(RelativeMovement::new("teleport")));
        assert_eq!(replies.len(), 1);
        assert!(matches!(
            &replies[0],
            ServerMessage::Error(e) if e.code == ErrorCode::InvalidMovement && e.user == Some(UserId::from_u128(1))
        ));
    }

    #[test]
    fn moving_out_of_turn_is_rejected() {
        let mut game = local_match(opening().with_current_player(Player::Black));
        game.opponent = Box::new(PassiveOpponent);
        let replies = game.handle(notation(place(Player::White, 1, 0)));
        assert!(matches!(
            &replies[0],
            ServerMessage::Error(e) if e.code == ErrorCode::NotPlayerTurn
        ));
    }

    #[test]
    fn opponent_opens_when_it_starts() {
        let mut game = local_match(opening().with_current_player(Player::Black));
        let opening = game.on_connect();
        assert_eq!(opening.len(), 2);
        assert!(matches!(&opening[1], ServerMessage::GameState(s) if s.current_player == Player::White));
    }

    #[test]
    fn last_move_reports_game_over() {
        let state = StateSnapshot::new()
            .with_moves(Player::White, vec![place(Player::White, 1, 0)])
            .with_moves(Player::Black, vec![Movement::Pass]);
        let mut game = local_match(state);
        let replies = game.handle(notation(place(Player::White, 1, 0)));
        assert!(matches!(replies.last(), Some(ServerMessage::GameOver(None))));
    }

    #[test]
    fn forfeit_ends_the_match_once() {
        let mut game = local_match(opening());
        let replies = game.handle(ClientMessage::Forfeit);
        assert_eq!(
            replies,
            vec![
                ServerMessage::Forfeit(UserId::from_u128(1)),
                ServerMessage::GameOver(Some(UserId::from_u128(2))),
            ]
        );
        let again = game.handle(ClientMessage::Forfeit);
        assert!(matches!(&again[0], ServerMessage::Error(e) if e.code == ErrorCode::InvalidCommand));
    }

    #[test]
    fn options_lock_after_the_first_move() {
        let mut game = local_match(opening());
        assert_eq!(
            game.handle(ClientMessage::SetOption(OptionKey::Pillbug, true)),
            vec![ServerMessage::SetOption(OptionKey::Pillbug, true)]
        );
        game.handle(notation(place(Player::White, 1, 0)));
        assert!(matches!(
            &game.handle(ClientMessage::SetOption(OptionKey::Pillbug, false))[0],
            ServerMessage::Error(e) if e.code == ErrorCode::OptionNonModifiable
        ));
    }

    #[test]
    fn chat_and_ready_are_echoed() {
        let mut game = local_match(opening());
        assert_eq!(
            game.handle(ClientMessage::Chat("hi there".into())),
            vec![ServerMessage::Chat(UserId::from_u128(1), "hi there".into())]
        );
        assert_eq!(
            game.handle(ClientMessage::ReadyToPlay),
            vec![ServerMessage::PlayerReady(UserId::from_u128(1), true)]
        );
    }

    #[test]
    fn seeded_opponents_agree() {
        let state = opening().with_current_player(Player::Black);
        let mut a = RandomOpponent::seeded(42);
        let mut b = RandomOpponent::seeded(42);
        for _ in 0..8 {
            assert_eq!(a.choose(&state), b.choose(&state));
        }
    }

    struct PassiveOpponent;

    impl Opponent<StateSnapshot> for PassiveOpponent {
        fn choose(&mut self, _state: &StateSnapshot) -> Option<Movement> {
            None
        }
    }

    #[tokio::test]
    async fn client_streams_connect_then_state() {
        let mut client = LocalClient::new();
        client.prepare(LocalConfig::new(opening(), RandomOpponent::seeded(1)));
        client.open_connection().unwrap();

        assert!(matches!(
            client.next_event().await,
            Some(Ok(ConnectionEvent::Connected))
        ));
        assert!(matches!(
            client.next_event().await,
            Some(Ok(ConnectionEvent::Message(ServerMessage::GameState(_))))
        ));

        client.open_connection().unwrap();
        assert!(matches!(
            client.next_event().await,
            Some(Ok(ConnectionEvent::AlreadyConnected))
        ));

        client.close().await;
        let closed = client.next_event().await.unwrap().unwrap();
        assert!(closed.is_normal_close());
        assert!(client.next_event().await.is_none());
    }

    #[tokio::test]
    async fn reconnect_resumes_the_same_match() {
        let mut client = LocalClient::new();
        client.prepare(LocalConfig::new(opening(), RandomOpponent::seeded(3)));
        client.open_connection().unwrap();
        let _ = client.next_event().await;
        let _ = client.next_event().await;

        client.send(notation(place(Player::White, 1, 0))).unwrap();
        let _ = client.next_event().await; // own move
        let _ = client.next_event().await; // opponent reply

        client.reconnect().unwrap();
        assert!(matches!(
            client.next_event().await,
            Some(Ok(ConnectionEvent::Connected))
        ));
        let Some(Ok(ConnectionEvent::Message(ServerMessage::GameState(state)))) =
            client.next_event().await
        else {
            panic!("expected the resumed state");
        };
        assert_eq!(state.updates.len(), 2);
    }

    #[test]
    fn unprepared_client_cannot_connect() {
        let mut client = LocalClient::<StateSnapshot>::new();
        assert!(matches!(
            client.open_connection(),
            Err(ConnectionError::NotPrepared)
        ));
        assert!(matches!(
            client.send(ClientMessage::ReadyToPlay),
            Err(ConnectionError::NotConnected)
        ));
    }
}
