//! Connection managers for a Hive match.
//!
//! A [`ConnectionManager`] owns one logical connection and exposes it as a
//! single ordered stream of [`ConnectionEvent`]s (errors included), read with
//! [`next_event`](ConnectionManager::next_event). Two implementations exist:
//!
//! - [`RemoteClient`] talks to a game server through a [`Transport`] opened by
//!   a [`Connector`] (WebSocket by default);
//! - [`LocalClient`](crate::local::LocalClient) plays against an in-process
//!   opponent.
//!
//! Managers report facts and never retry on their own. The owner of the event
//! stream decides whether a failure deserves another
//! [`reconnect`](ConnectionManager::reconnect).
//!
//! Every `open_connection`/`reconnect` that starts a new attempt spawns a
//! background task with its own event channel. The previous task is aborted
//! and its channel dropped first, so events never leak from one connection
//! instance into the next.
//!
//! # Example
//!
//! ```rust,ignore
//! let account = Account::online(user_id, "token");
//! let mut client = RemoteClient::<StateSnapshot>::new();
//! client.prepare(RemoteConfig::new(account).with_url("ws://localhost:8080/game/7/play"));
//! client.open_connection()?;
//!
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         Ok(ConnectionEvent::Connected) => client.send(ClientMessage::ReadyToPlay)?,
//!         Ok(ConnectionEvent::Closed { .. }) => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::engine::GameState;
use crate::error::{ConnectionError, Result};
use crate::event::{ConnectionEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::local::{LocalClient, LocalConfig};
use crate::protocol::{ClientMessage, UserId};
use crate::transport::{Connector, Transport, TransportFrame};

/// Default capacity of the bounded event channel.
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for establishing a remote connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One item of a connection's event stream.
pub type EventResult<S> = std::result::Result<ConnectionEvent<S>, ConnectionError>;

// ── Account ─────────────────────────────────────────────────────────

/// The identity attached to a remote connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    /// A signed-in account with a server-issued token.
    Online { user_id: UserId, token: String },
    /// A device-only account. It can play local matches but never connect.
    Offline { user_id: UserId },
}

impl Account {
    pub fn online(user_id: UserId, token: impl Into<String>) -> Self {
        Self::Online {
            user_id,
            token: token.into(),
        }
    }

    pub fn offline(user_id: UserId) -> Self {
        Self::Offline { user_id }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Self::Online { user_id, .. } | Self::Offline { user_id } => *user_id,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline { .. })
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RemoteClient`].
///
/// # Example
///
/// ```
/// use hive_client::client::{Account, RemoteConfig};
/// use std::time::Duration;
///
/// let config = RemoteConfig::new(Account::online(uuid::Uuid::nil(), "token"))
///     .with_url("ws://localhost:8080/game/1/play")
///     .with_connect_timeout(Duration::from_secs(3));
/// assert_eq!(config.event_channel_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Server address of the match to play. Required before connecting.
    pub url: Option<String>,
    /// Identity used for the connection.
    pub account: Account,
    /// Capacity of the bounded event channel.
    ///
    /// The connection task waits for the consumer when the channel is full
    /// rather than dropping events, so game states are never lost.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown performed by `close()`.
    ///
    /// Defaults to **1 second**. A zero timeout aborts immediately.
    pub shutdown_timeout: Duration,
    /// Timeout for a single connection attempt.
    ///
    /// Defaults to **10 seconds**.
    pub connect_timeout: Duration,
}

impl RemoteConfig {
    /// Create a configuration for `account` with default values and no URL.
    pub fn new(account: Account) -> Self {
        Self {
            url: None,
            account,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the server URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the timeout for a single connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ── Contract ────────────────────────────────────────────────────────

/// The capability shared by remote and local connections.
///
/// Methods that start work (`open_connection`, `reconnect`) return as soon as
/// the attempt is scheduled; the outcome arrives later on the event stream as
/// `Connected` or an error. They must be called from within a Tokio runtime.
#[async_trait]
pub trait ConnectionManager<S: GameState>: Send {
    /// Start a connection, or emit `AlreadyConnected` on the existing stream.
    ///
    /// # Errors
    ///
    /// Returns a configuration error ([`ConnectionError::NotPrepared`],
    /// [`ConnectionError::MissingUrl`], [`ConnectionError::UsingOfflineAccount`]).
    fn open_connection(&mut self) -> Result<()>;

    /// Retire the current stream and start a fresh attempt.
    ///
    /// # Errors
    ///
    /// Same as [`open_connection`](Self::open_connection).
    fn reconnect(&mut self) -> Result<()>;

    /// Queue a message. Its effects are observed later as server events.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] without a live connection.
    fn send(&self, message: ClientMessage) -> Result<()>;

    /// Next item of the current stream. `None` once the stream has completed
    /// or if no connection was ever opened.
    ///
    /// Cancel-safe.
    async fn next_event(&mut self) -> Option<EventResult<S>>;

    /// Close the connection and release its resources. Idempotent.
    async fn close(&mut self);
}

// ── Connection instance ─────────────────────────────────────────────

/// Commands from a manager to its connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Send(ClientMessage),
    AnnounceConnected,
}

/// Handle to one spawned connection task and its event channel.
pub(crate) struct Instance<S> {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: mpsc::Receiver<EventResult<S>>,
    connected: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// The task-side ends of an [`Instance`].
pub(crate) struct TaskChannels<S> {
    pub(crate) cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub(crate) event_tx: mpsc::Sender<EventResult<S>>,
    pub(crate) shutdown_rx: oneshot::Receiver<()>,
    pub(crate) connected: Arc<AtomicBool>,
}

impl<S: GameState> Instance<S> {
    /// Spawn `task` with fresh channels.
    pub(crate) fn spawn<F, Fut>(capacity: usize, task: F) -> Self
    where
        F: FnOnce(TaskChannels<S>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let (event_tx, events) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(task(TaskChannels {
            cmd_rx,
            event_tx,
            shutdown_rx,
            connected: Arc::clone(&connected),
        }));

        Self {
            cmd_tx,
            events,
            connected,
            task: Some(handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the task is still running (connecting or connected).
    pub(crate) fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub(crate) fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.cmd_tx
            .send(Command::Send(message))
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Ask the task to emit `AlreadyConnected` in stream order.
    pub(crate) fn announce_connected(&self) {
        if self.cmd_tx.send(Command::AnnounceConnected).is_err() {
            debug!("connection task gone, cannot announce");
        }
    }

    pub(crate) async fn next_event(&mut self) -> Option<EventResult<S>> {
        self.events.recv().await
    }

    /// Signal the task to close gracefully, aborting it after `timeout`.
    pub(crate) async fn shutdown(&mut self, timeout: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
    }
}

impl<S> Drop for Instance<S> {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; aborting drops the transport.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Deliver an item to the event channel, waiting for room if it is full.
pub(crate) async fn emit<S>(event_tx: &mpsc::Sender<EventResult<S>>, item: EventResult<S>) {
    if event_tx.send(item).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Remote client ───────────────────────────────────────────────────

/// Connection manager for a match hosted on a game server.
pub struct RemoteClient<S> {
    config: Option<RemoteConfig>,
    connector: Arc<dyn Connector>,
    instance: Option<Instance<S>>,
}

#[cfg(feature = "transport-websocket")]
impl<S: GameState> RemoteClient<S> {
    /// An unprepared client that connects over WebSocket.
    pub fn new() -> Self {
        Self::with_connector(crate::transports::WebSocketConnector)
    }
}

#[cfg(feature = "transport-websocket")]
impl<S: GameState> Default for RemoteClient<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GameState> RemoteClient<S> {
    /// An unprepared client that opens transports with `connector`.
    pub fn with_connector(connector: impl Connector) -> Self {
        Self {
            config: None,
            connector: Arc::new(connector),
            instance: None,
        }
    }

    /// Store the configuration used by the next connection attempt.
    ///
    /// Does not connect. Calling it again replaces the stored configuration.
    pub fn prepare(&mut self, config: RemoteConfig) {
        self.config = Some(config);
    }

    /// The configuration, if [`prepare`](Self::prepare) was called.
    pub fn config(&self) -> Option<&RemoteConfig> {
        self.config.as_ref()
    }

    fn validated_config(&self) -> Result<&RemoteConfig> {
        let config = self.config.as_ref().ok_or(ConnectionError::NotPrepared)?;
        if config.account.is_offline() {
            return Err(ConnectionError::UsingOfflineAccount);
        }
        match config.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(config),
            _ => Err(ConnectionError::MissingUrl),
        }
    }

    fn start_instance(&mut self) -> Result<()> {
        let config = self.validated_config()?;
        let url = config.url.clone().unwrap_or_default();
        let token = match &config.account {
            Account::Online { token, .. } => token.clone(),
            Account::Offline { .. } => return Err(ConnectionError::UsingOfflineAccount),
        };
        let connect_timeout = config.connect_timeout;
        let capacity = config.event_channel_capacity;
        let connector = Arc::clone(&self.connector);

        debug!(url = %url, "starting connection attempt");
        self.instance = Some(Instance::spawn(capacity, move |channels| {
            connection_task::<S>(connector, url, token, connect_timeout, channels)
        }));
        Ok(())
    }
}

#[async_trait]
impl<S: GameState> ConnectionManager<S> for RemoteClient<S> {
    fn open_connection(&mut self) -> Result<()> {
        self.validated_config()?;
        if let Some(instance) = &self.instance {
            if instance.is_connected() {
                debug!("already connected, reusing the existing stream");
                instance.announce_connected();
                return Ok(());
            }
            if instance.is_live() {
                debug!("connection attempt already in flight");
                return Ok(());
            }
        }
        self.start_instance()
    }

    fn reconnect(&mut self) -> Result<()> {
        self.validated_config()?;
        // Retire the old stream before the new one can emit anything.
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
        debug!("RemoteClient: close requested");
        let timeout = self
            .config
            .as_ref()
            .map_or(DEFAULT_SHUTDOWN_TIMEOUT, |c| c.shutdown_timeout);
        if let Some(instance) = self.instance.as_mut() {
            instance.shutdown(timeout).await;
        }
    }
}

impl<S> std::fmt::Debug for RemoteClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("prepared", &self.config.is_some())
            .field(
                "connected",
                &self
                    .instance
                    .as_ref()
                    .is_some_and(|i| i.connected.load(Ordering::Acquire)),
            )
            .finish()
    }
}

/// Background task for one remote connection attempt.
///
/// Connects, then multiplexes outgoing commands and incoming lines via
/// `tokio::select!`. Exits when:
/// - the connection attempt fails or times out
/// - the shutdown signal fires or the command channel closes
/// - the transport closes or errors
async fn connection_task<S: GameState>(
    connector: Arc<dyn Connector>,
    url: String,
    token: String,
    connect_timeout: Duration,
    channels: TaskChannels<S>,
) {
    let TaskChannels {
        mut cmd_rx,
        event_tx,
        mut shutdown_rx,
        connected,
    } = channels;
    debug!("connection task started");

    let attempt = tokio::time::timeout(connect_timeout, connector.connect(&url, &token));
    let mut transport: Box<dyn Transport> = tokio::select! {
        _ = &mut shutdown_rx => {
            debug!("connection attempt cancelled");
            return;
        }
        result = attempt => match result {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                error!("failed to connect: {e}");
                let err = match e {
                    ConnectionError::FailedToConnect(_) => e,
                    other => ConnectionError::FailedToConnect(other.to_string()),
                };
                emit(&event_tx, Err(err)).await;
                return;
            }
            Err(_) => {
                error!(url = %url, "connection attempt timed out");
                emit(&event_tx, Err(ConnectionError::Timeout)).await;
                return;
            }
        }
    };

    connected.store(true, Ordering::Release);
    info!(url = %url, "connected to game server");
    emit(&event_tx, Ok(ConnectionEvent::Connected)).await;

    loop {
        tokio::select! {
            // Branch 1: outgoing command from the manager
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(msg)) => {
                        let line = codec::encode(&msg);
                        debug!(line = %line, "sending client message");
                        if let Err(e) = transport.send(line).await {
                            error!("transport send error: {e}");
                            connected.store(false, Ordering::Release);
                            emit(&event_tx, Err(e)).await;
                            break;
                        }
                    }
                    Some(Command::AnnounceConnected) => {
                        emit(&event_tx, Ok(ConnectionEvent::AlreadyConnected)).await;
                    }
                    // Command channel closed: manager dropped.
                    None => {
                        debug!("command channel closed, shutting down connection task");
                        close_transport(transport.as_mut(), &connected, &event_tx).await;
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                close_transport(transport.as_mut(), &connected, &event_tx).await;
                break;
            }

            // Branch 3: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(TransportFrame::Line(line))) => {
                        if let Some(msg) = codec::decode::<S>(&line) {
                            debug!(kind = msg.kind(), "received server message");
                            emit(&event_tx, Ok(ConnectionEvent::Message(msg))).await;
                        }
                    }
                    Some(Ok(TransportFrame::Closed { code, reason })) => {
                        info!(code, reason = %reason, "server closed the connection");
                        connected.store(false, Ordering::Release);
                        emit(&event_tx, Ok(ConnectionEvent::Closed { reason, code })).await;
                        break;
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        connected.store(false, Ordering::Release);
                        emit(&event_tx, Err(e)).await;
                        break;
                    }
                    None => {
                        warn!("transport ended without a close frame");
                        connected.store(false, Ordering::Release);
                        let event = ConnectionEvent::Closed {
                            reason: "connection lost".into(),
                            code: CLOSE_ABNORMAL,
                        };
                        emit(&event_tx, Ok(event)).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("connection task exited");
}

/// Close the transport with a normal closure and report it on the stream.
async fn close_transport<S>(
    transport: &mut dyn Transport,
    connected: &AtomicBool,
    event_tx: &mpsc::Sender<EventResult<S>>,
) {
    if let Err(e) = transport.close().await {
        warn!("transport close failed: {e}");
    }
    connected.store(false, Ordering::Release);
    let event = ConnectionEvent::Closed {
        reason: "client closed".into(),
        code: CLOSE_NORMAL,
    };
    emit(event_tx, Ok(event)).await;
}

// ── Backend selection ───────────────────────────────────────────────

/// Chooses the backend of a [`GameClient`].
pub enum ClientConfig<S> {
    Remote(RemoteConfig),
    Local(LocalConfig<S>),
}

/// A prepared connection manager whose backend was picked by a [`ClientConfig`].
pub enum GameClient<S> {
    Remote(RemoteClient<S>),
    Local(LocalClient<S>),
}

impl<S: GameState> GameClient<S> {
    /// Build and prepare the backend named by `config`.
    #[cfg(feature = "transport-websocket")]
    pub fn from_config(config: ClientConfig<S>) -> Self {
        Self::from_config_with_connector(config, crate::transports::WebSocketConnector)
    }

    /// Like [`from_config`](Self::from_config) with an explicit remote connector.
    pub fn from_config_with_connector(config: ClientConfig<S>, connector: impl Connector) -> Self {
        match config {
            ClientConfig::Remote(remote) => {
                let mut client = RemoteClient::with_connector(connector);
                client.prepare(remote);
                Self::Remote(client)
            }
            ClientConfig::Local(local) => {
                let mut client = LocalClient::new();
                client.prepare(local);
                Self::Local(client)
            }
        }
    }
}

#[async_trait]
impl<S: GameState> ConnectionManager<S> for GameClient<S> {
    fn open_connection(&mut self) -> Result<()> {
        match self {
            Self::Remote(client) => client.open_connection(),
            Self::Local(client) => client.open_connection(),
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        match self {
            Self::Remote(client) => client.reconnect(),
            Self::Local(client) => client.reconnect(),
        }
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        match self {
            Self::Remote(client) => client.send(message),
            Self::Local(client) => client.send(message),
        }
    }

    async fn next_event(&mut self) -> Option<EventResult<S>> {
        match self {
            Self::Remote(client) => client.next_event().await,
            Self::Local(client) => client.next_event().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Remote(client) => client.close().await,
            Self::Local(client) => client.close().await,
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
    use crate::engine::StateSnapshot;

    struct UnreachableConnector;

    #[async_trait]
    impl Connector for UnreachableConnector {
        async fn connect(&self, _url: &str, _token: &str) -> Result<Box<dyn Transport>> {
            Err(ConnectionError::FailedToConnect("unreachable".into()))
        }
    }

    fn client() -> RemoteClient<StateSnapshot> {
        RemoteClient::with_connector(UnreachableConnector)
    }

    fn online() -> Account {
        Account::online(UserId::from_u128(1), "token")
    }

    #[test]
    fn open_without_prepare_is_not_prepared() {
        let mut client = client();
        assert!(matches!(
            client.open_connection(),
            Err(ConnectionError::NotPrepared)
        ));
        assert!(matches!(client.reconnect(), Err(ConnectionError::NotPrepared)));
    }

    #[test]
    fn offline_account_is_rejected() {
        let mut client = client();
        client.prepare(
            RemoteConfig::new(Account::offline(UserId::from_u128(1))).with_url("ws://localhost:1"),
        );
        assert!(matches!(
            client.open_connection(),
            Err(ConnectionError::UsingOfflineAccount)
        ));
    }

    #[test]
    fn missing_or_blank_url_is_rejected() {
        let mut client = client();
        client.prepare(RemoteConfig::new(online()));
        assert!(matches!(
            client.open_connection(),
            Err(ConnectionError::MissingUrl)
        ));

        client.prepare(RemoteConfig::new(online()).with_url("   "));
        assert!(matches!(
            client.open_connection(),
            Err(ConnectionError::MissingUrl)
        ));
    }

    #[test]
    fn send_without_connection_fails() {
        let client = client();
        assert!(matches!(
            client.send(ClientMessage::ReadyToPlay),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn config_defaults_and_clamping() {
        let config = RemoteConfig::new(online()).with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.url.is_none());
    }

    #[tokio::test]
    async fn failed_connect_is_reported_on_the_stream() {
        let mut client = client();
        client.prepare(RemoteConfig::new(online()).with_url("ws://localhost:1"));
        client.open_connection().unwrap();

        let item = client.next_event().await.unwrap();
        assert!(matches!(item, Err(ConnectionError::FailedToConnect(_))));
        assert!(client.next_event().await.is_none(), "stream completes");
    }

    #[tokio::test]
    async fn next_event_without_connection_is_none() {
        let mut client = client();
        assert!(client.next_event().await.is_none());
        client.close().await;
        client.close().await;
    }
}
