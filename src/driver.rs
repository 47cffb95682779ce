//! Runs a [`GameSession`] against a [`ConnectionManager`] in a background task.
//!
//! The task is the single consumer of the connection's event stream and the
//! single writer of the session. Everything else talks to it through
//! [`SessionHandle`]: intents go in over a channel, [`SessionView`] copies
//! come out on a `watch`, and [`Notice`]s on a bounded channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let (mut handle, mut notices) = SessionHandle::start(client, GameSession::new(config));
//!
//! handle.select(unit)?;
//! handle.drop_on(position)?;
//! while let Some(notice) = notices.recv().await {
//!     if let Notice::ConfirmMovement(_) = notice {
//!         handle.confirm_movement()?;
//!     }
//! }
//! handle.shutdown().await;
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::ConnectionManager;
use crate::engine::{GameState, Movement, Position, Unit};
use crate::error::{ConnectionError, Result};
use crate::protocol::OptionKey;
use crate::session::{GameSession, Notice, SessionAction, SessionState, SessionView};

/// Default capacity of the notice channel.
const DEFAULT_NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Default pause before a reconnect attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default timeout for [`SessionHandle::shutdown`].
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Something the player wants to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Select(Unit),
    DropOn(Position),
    ConfirmMovement,
    CancelMovement,
    AcknowledgePass,
    /// Submit a movement without the select/drop/confirm round-trip.
    Play(Movement),
    Forfeit,
    SetOption(OptionKey, bool),
    Ready,
    Chat(String),
}

/// Configuration for the session task.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Capacity of the notice channel. When full, advisory notices are
    /// dropped with a warning, while those the player has to act on
    /// ([`Notice::must_deliver`]) wait for room.
    ///
    /// Defaults to **64**. Values below 1 are clamped to 1.
    pub notice_channel_capacity: usize,
    /// Pause before each reconnect attempt. Cancelled by shutdown.
    ///
    /// Defaults to **500 ms**.
    pub reconnect_delay: Duration,
    /// Timeout for [`SessionHandle::shutdown`].
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            notice_channel_capacity: DEFAULT_NOTICE_CHANNEL_CAPACITY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn with_notice_channel_capacity(mut self, capacity: usize) -> Self {
        self.notice_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Handle to a running session task.
pub struct SessionHandle<S> {
    intent_tx: mpsc::UnboundedSender<Intent>,
    view_rx: watch::Receiver<SessionView<S>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl<S: GameState> SessionHandle<S> {
    /// Spawn the session task with default settings and open the connection.
    ///
    /// Returns the handle and the receiver of user-facing notices. Must be
    /// called from within a Tokio runtime.
    pub fn start<C>(client: C, session: GameSession<S>) -> (Self, mpsc::Receiver<Notice>)
    where
        C: ConnectionManager<S> + 'static,
    {
        Self::start_with_config(client, session, DriverConfig::default())
    }

    /// Like [`start`](Self::start) with explicit settings.
    pub fn start_with_config<C>(
        client: C,
        session: GameSession<S>,
        config: DriverConfig,
    ) -> (Self, mpsc::Receiver<Notice>)
    where
        C: ConnectionManager<S> + 'static,
    {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::channel(config.notice_channel_capacity.max(1));
        let (view_tx, view_rx) = watch::channel(session.view());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shutdown_timeout = config.shutdown_timeout;

        let driver = Driver {
            client,
            session,
            notice_tx,
            view_tx,
            reconnect_delay: config.reconnect_delay,
            stream_open: false,
            reconnect_at: None,
        };
        let task = tokio::spawn(driver.run(intent_rx, shutdown_rx));

        let handle = Self {
            intent_tx,
            view_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            shutdown_timeout,
        };
        (handle, notice_rx)
    }

    /// Queue an intent for the session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] once the session task has exited.
    pub fn intent(&self, intent: Intent) -> Result<()> {
        self.intent_tx
            .send(intent)
            .map_err(|_| ConnectionError::NotConnected)
    }

    pub fn select(&self, unit: Unit) -> Result<()> {
        self.intent(Intent::Select(unit))
    }

    pub fn drop_on(&self, position: Position) -> Result<()> {
        self.intent(Intent::DropOn(position))
    }

    pub fn confirm_movement(&self) -> Result<()> {
        self.intent(Intent::ConfirmMovement)
    }

    pub fn cancel_movement(&self) -> Result<()> {
        self.intent(Intent::CancelMovement)
    }

    pub fn acknowledge_pass(&self) -> Result<()> {
        self.intent(Intent::AcknowledgePass)
    }

    pub fn play(&self, movement: Movement) -> Result<()> {
        self.intent(Intent::Play(movement))
    }

    pub fn forfeit(&self) -> Result<()> {
        self.intent(Intent::Forfeit)
    }

    pub fn set_option(&self, key: OptionKey, value: bool) -> Result<()> {
        self.intent(Intent::SetOption(key, value))
    }

    pub fn ready(&self) -> Result<()> {
        self.intent(Intent::Ready)
    }

    pub fn chat(&self, text: impl Into<String>) -> Result<()> {
        self.intent(Intent::Chat(text.into()))
    }

    /// A copy of the latest published view.
    pub fn view(&self) -> SessionView<S> {
        self.view_rx.borrow().clone()
    }

    /// A receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<SessionView<S>> {
        self.view_rx.clone()
    }

    /// Whether the session task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Shut the session down and close its connection. Idempotent.
    ///
    /// Waits up to the configured timeout, then aborts the task.
    pub async fn shutdown(&mut self) {
        debug!("SessionHandle: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session task aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl<S> Drop for SessionHandle<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<S> std::fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.view_rx.borrow().state)
            .field(
                "running",
                &self.task.as_ref().is_some_and(|task| !task.is_finished()),
            )
            .finish()
    }
}

// ── Session task ────────────────────────────────────────────────────

/// One wake-up of the session task.
enum Step<S> {
    Event(Option<crate::client::EventResult<S>>),
    Intent(Option<Intent>),
    Reconnect,
    Shutdown,
}

struct Driver<S, C> {
    client: C,
    session: GameSession<S>,
    notice_tx: mpsc::Sender<Notice>,
    view_tx: watch::Sender<SessionView<S>>,
    reconnect_delay: Duration,
    stream_open: bool,
    reconnect_at: Option<Instant>,
}

impl<S: GameState, C: ConnectionManager<S>> Driver<S, C> {
    async fn run(
        mut self,
        mut intent_rx: mpsc::UnboundedReceiver<Intent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        info!("session task started");
        match self.client.open_connection() {
            Ok(()) => self.stream_open = true,
            Err(e) => self.session.handle_event(Err(e)),
        }
        self.execute().await;
        self.publish();

        loop {
            let stream_open = self.stream_open;
            let reconnect_at = self.reconnect_at;

            let step = tokio::select! {
                event = self.client.next_event(), if stream_open => Step::Event(event),
                intent = intent_rx.recv() => Step::Intent(intent),
                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)),
                    if reconnect_at.is_some() => Step::Reconnect,
                _ = &mut shutdown_rx => Step::Shutdown,
            };

            match step {
                Step::Event(Some(item)) => self.session.handle_event(item),
                Step::Event(None) => {
                    debug!("connection stream completed");
                    self.stream_open = false;
                }
                Step::Intent(Some(intent)) => self.apply(intent),
                Step::Reconnect => {
                    self.reconnect_at = None;
                    match self.client.reconnect() {
                        Ok(()) => self.stream_open = true,
                        Err(e) => self.session.handle_event(Err(e)),
                    }
                }
                // Handle dropped or shutdown requested.
                Step::Intent(None) | Step::Shutdown => {
                    self.reconnect_at = None;
                    self.session.shut_down();
                }
            }

            self.execute().await;
            self.publish();

            if self.session.state() == SessionState::ShutDown {
                break;
            }
        }

        info!("session task exited");
    }

    fn apply(&mut self, intent: Intent) {
        debug!(?intent, "intent");
        let session = &mut self.session;
        match intent {
            Intent::Select(unit) => session.select(unit),
            Intent::DropOn(position) => session.drop_on(position),
            Intent::ConfirmMovement => session.confirm_movement(),
            Intent::CancelMovement => session.cancel_movement(),
            Intent::AcknowledgePass => session.acknowledge_pass(),
            Intent::Play(movement) => {
                if !session.play(movement) {
                    debug!(%movement, "movement not playable now");
                }
            }
            Intent::Forfeit => session.forfeit(),
            Intent::SetOption(key, value) => session.set_option(key, value),
            Intent::Ready => session.ready(),
            Intent::Chat(text) => session.chat(text),
        }
    }

    /// Carry out the session's recorded actions, in order.
    async fn execute(&mut self) {
        for action in self.session.take_actions() {
            match action {
                SessionAction::Send(message) => {
                    if let Err(e) = self.client.send(message.clone()) {
                        warn!("connection refused outgoing message, holding it: {e}");
                        self.session.requeue(message);
                    }
                }
                SessionAction::Reconnect => {
                    self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
                }
                SessionAction::Close => {
                    self.reconnect_at = None;
                    self.client.close().await;
                }
                SessionAction::Notify(notice) if notice.must_deliver() => {
                    // Waits for room; only fails once the receiver is gone.
                    if self.notice_tx.send(notice).await.is_err() {
                        debug!("notice receiver dropped");
                    }
                }
                SessionAction::Notify(notice) => {
                    if let Err(e) = self.notice_tx.try_send(notice) {
                        warn!("notice dropped: {e}");
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.session.view());
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
    use crate::client::{Account, RemoteClient, RemoteConfig};
    use crate::engine::{Player, StateSnapshot, UnitClass};
    use crate::local::{LocalClient, LocalConfig, RandomOpponent};
    use crate::protocol::UserId;
    use crate::session::SessionConfig;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ME: UserId = UserId::from_u128(1);
    const THEM: UserId = UserId::from_u128(2);
    const WAIT: Duration = Duration::from_secs(2);

    fn place(owner: Player, index: u8, to: Position) -> Movement {
        Movement::Place {
            unit: Unit::new(owner, UnitClass::Ant, index),
            to,
        }
    }

    fn local_client(state: StateSnapshot) -> LocalClient<StateSnapshot> {
        let mut client = LocalClient::new();
        client.prepare(
            LocalConfig::new(state, RandomOpponent::seeded(5))
                .with_local_user(ME)
                .with_opponent_user(THEM),
        );
        client
    }

    fn test_config() -> DriverConfig {
        DriverConfig::default().with_reconnect_delay(Duration::ZERO)
    }

    async fn wait_for_view(
        view: &mut watch::Receiver<SessionView<StateSnapshot>>,
        wanted: impl Fn(&SessionView<StateSnapshot>) -> bool,
    ) -> SessionView<StateSnapshot> {
        tokio::time::timeout(WAIT, view.wait_for(|v| wanted(v)))
            .await
            .expect("timed out waiting for session state")
            .expect("session task gone")
            .clone()
    }

    #[tokio::test]
    async fn plays_a_confirmed_movement_against_a_local_opponent() {
        let origin = Position::ORIGIN;
        let state = StateSnapshot::new()
            .with_moves(
                Player::White,
                vec![place(Player::White, 1, origin), place(Player::White, 2, origin)],
            )
            .with_moves(Player::Black, vec![place(Player::Black, 1, Position::new(1, -1, 0))]);
        let session = GameSession::new(SessionConfig::new(ME, Player::White));
        let (mut handle, mut notices) =
            SessionHandle::start_with_config(local_client(state), session, test_config());
        let mut view = handle.subscribe();

        wait_for_view(&mut view, |v| v.state == SessionState::PlayerTurn).await;

        handle.select(Unit::new(Player::White, UnitClass::Ant, 1)).unwrap();
        handle.drop_on(origin).unwrap();
        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, Notice::ConfirmMovement(_)));
        handle.confirm_movement().unwrap();

        // Own move, the opponent's answer, and back to us.
        let after = wait_for_view(&mut view, |v| {
            v.state == SessionState::PlayerTurn
                && v.snapshot.state.as_ref().is_some_and(|g| g.updates.len() == 2)
        })
        .await;
        assert_eq!(after.snapshot.selection.currently_selected, None);

        let narration = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(narration, Notice::Narration(n) if n.player == Player::Black));

        handle.forfeit().unwrap();
        wait_for_view(&mut view, |v| v.state == SessionState::Forfeit).await;

        handle.shutdown().await;
        handle.shutdown().await;
        assert!(!handle.is_running());
        assert_eq!(handle.view().state, SessionState::ShutDown);
    }

    #[tokio::test]
    async fn forced_pass_is_submitted_after_acknowledgement() {
        let state = StateSnapshot::new()
            .with_moves(Player::White, vec![Movement::Pass])
            .with_moves(Player::Black, vec![place(Player::Black, 1, Position::ORIGIN)]);
        let session = GameSession::new(SessionConfig::new(ME, Player::White));
        let (mut handle, mut notices) =
            SessionHandle::start_with_config(local_client(state), session, test_config());

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert_eq!(notice, Notice::MustPass);
        handle.acknowledge_pass().unwrap();

        let mut view = handle.subscribe();
        let after = wait_for_view(&mut view, |v| v.state == SessionState::GameEnd).await;
        let game = after.snapshot.state.unwrap();
        assert_eq!(game.updates[0].movement, Movement::Pass);

        handle.shutdown().await;
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &str, _token: &str) -> Result<Box<dyn Transport>> {
            Err(ConnectionError::FailedToConnect("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn exhausted_reconnects_forfeit_the_match() {
        let mut client = RemoteClient::<StateSnapshot>::with_connector(RefusingConnector);
        client.prepare(
            RemoteConfig::new(Account::online(ME, "token")).with_url("ws://localhost:9/game"),
        );
        let session = GameSession::new(SessionConfig::new(ME, Player::White));
        let (mut handle, mut notices) =
            SessionHandle::start_with_config(client, session, test_config());
        let mut view = handle.subscribe();

        wait_for_view(&mut view, |v| v.state == SessionState::Forfeit).await;

        let mut received = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            received.push(notice);
        }
        let reconnecting = received
            .iter()
            .filter(|n| matches!(n, Notice::Reconnecting { .. }))
            .count();
        assert_eq!(reconnecting, 5);
        assert_eq!(received.last(), Some(&Notice::FailedToReconnect));

        handle.shutdown().await;
    }

    #[derive(Default)]
    struct CountingRefuser {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingRefuser {
        async fn connect(&self, _url: &str, _token: &str) -> Result<Box<dyn Transport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ConnectionError::FailedToConnect("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn final_notice_survives_a_full_channel() {
        let connector = CountingRefuser::default();
        let attempts = Arc::clone(&connector.attempts);
        let mut client = RemoteClient::<StateSnapshot>::with_connector(connector);
        client.prepare(
            RemoteConfig::new(Account::online(ME, "token")).with_url("ws://localhost:9/game"),
        );
        let session = GameSession::new(SessionConfig::new(ME, Player::White));
        let (mut handle, mut notices) = SessionHandle::start_with_config(
            client,
            session,
            test_config().with_notice_channel_capacity(1),
        );

        // Nobody reads until every attempt has failed.
        tokio::time::timeout(WAIT, async {
            while attempts.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert_eq!(first, Notice::Reconnecting { attempt: 1, ceiling: 5 });
        let last = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert_eq!(last, Notice::FailedToReconnect);

        let mut view = handle.subscribe();
        wait_for_view(&mut view, |v| v.state == SessionState::Forfeit).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn offline_account_is_reported_and_not_retried() {
        let mut client = RemoteClient::<StateSnapshot>::with_connector(RefusingConnector);
        client.prepare(RemoteConfig::new(Account::offline(ME)).with_url("ws://localhost:9/game"));
        let session = GameSession::new(SessionConfig::new(ME, Player::White));
        let (mut handle, mut notices) =
            SessionHandle::start_with_config(client, session, test_config());

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, Notice::Misconfigured(_)));
        assert_eq!(handle.view().state, SessionState::Begin);
        assert_eq!(handle.view().reconnect_attempts, 0);

        handle.shutdown().await;
        assert!(handle.intent(Intent::Ready).is_err());
    }
}
