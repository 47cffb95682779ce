#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Hive client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands out
//! queued transports, and helpers for building game states and wire lines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use hive_client::engine::GameState;
use hive_client::transport::TransportFrame;
use hive_client::{
    Account, ConnectionError, Connector, Movement, Player, Position, RemoteClient, RemoteConfig,
    StateSnapshot, Transport, Unit, UnitClass, UserId,
};

pub const ME: UserId = UserId::from_u128(1);
pub const THEM: UserId = UserId::from_u128(2);

// ── MockTransport ───────────────────────────────────────────────────

/// One scripted result of [`Transport::recv`].
pub type Scripted = Option<Result<TransportFrame, ConnectionError>>;

/// A scripted mock transport.
///
/// Scripted frames are consumed in order by `recv()`. Once the script is
/// exhausted `recv()` hangs, keeping the connection open until closed.
pub struct MockTransport {
    incoming: VecDeque<Scripted>,
    /// Recorded outgoing lines.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport with the given script, plus handles for inspecting
    /// sent lines and whether close was called.
    pub fn new(incoming: Vec<Scripted>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, line: String) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ConnectionError::TransportClosed);
        }
        self.sent.lock().unwrap().push(line);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// A scripted line.
pub fn line(text: impl Into<String>) -> Scripted {
    Some(Ok(TransportFrame::Line(text.into())))
}

/// A scripted close frame.
pub fn close_frame(code: u16, reason: &str) -> Scripted {
    Some(Ok(TransportFrame::Closed {
        code,
        reason: reason.into(),
    }))
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out queued connection outcomes, one per attempt. When the queue is
/// empty every attempt fails with `FailedToConnect`.
#[derive(Clone, Default)]
pub struct MockConnector {
    outcomes: Arc<StdMutex<VecDeque<Result<MockTransport, ConnectionError>>>>,
    /// Number of connection attempts made.
    pub attempts: Arc<AtomicUsize>,
    /// The token presented on the last attempt.
    pub last_token: Arc<StdMutex<Option<String>>>,
}

impl MockConnector {
    pub fn new(outcomes: Vec<Result<MockTransport, ConnectionError>>) -> Self {
        Self {
            outcomes: Arc::new(StdMutex::new(VecDeque::from(outcomes))),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, token: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = Some(token.to_string());
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(ConnectionError::FailedToConnect("no server".into())),
        }
    }
}

/// Never finishes connecting.
pub struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn connect(&self, _url: &str, _token: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        std::future::pending().await
    }
}

/// A prepared remote client using `connector`.
pub fn remote_client(connector: impl Connector) -> RemoteClient<StateSnapshot> {
    let mut client = RemoteClient::with_connector(connector);
    client.prepare(
        RemoteConfig::new(Account::online(ME, "secret-token"))
            .with_url("ws://hive.test/game/1/play")
            .with_shutdown_timeout(Duration::from_millis(200)),
    );
    client
}

// ── Game fixtures ───────────────────────────────────────────────────

pub fn ant(owner: Player, index: u8) -> Unit {
    Unit::new(owner, UnitClass::Ant, index)
}

pub fn place(owner: Player, index: u8, to: Position) -> Movement {
    Movement::Place {
        unit: ant(owner, index),
        to,
    }
}

/// White to move, with `wA1 → (0,0,0)` available; black can only pass.
pub fn opening() -> StateSnapshot {
    StateSnapshot::new()
        .with_moves(
            Player::White,
            vec![
                place(Player::White, 1, Position::ORIGIN),
                place(Player::White, 2, Position::new(1, -1, 0)),
            ],
        )
        .with_moves(Player::Black, vec![Movement::Pass])
}

/// The `STATE` line for `state`.
pub fn state_line(state: &StateSnapshot) -> String {
    format!("STATE {}", state.encode_state().unwrap())
}

/// Wait for `future`, failing the test after two seconds.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
