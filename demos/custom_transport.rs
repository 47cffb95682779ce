//! # Custom Transport Example
//!
//! Shows how to implement the [`Transport`] and [`Connector`] traits with an
//! in-process loopback channel, and drives a [`RemoteClient`] through a short
//! scripted game. This is useful for:
//!
//! - **Testing**: exercise the wire protocol without a real server
//! - **Custom backends**: adapt any line-based I/O layer (TCP, QUIC, ...)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use async_trait::async_trait;
use hive_client::engine::RelativeMovement;
use hive_client::transport::TransportFrame;
use hive_client::{
    Account, ClientMessage, ConnectionError, ConnectionEvent, ConnectionManager, Connector,
    GameState, Movement, Player, Position, RemoteClient, RemoteConfig, ServerMessage,
    StateSnapshot, Transport, Unit, UnitClass, UserId,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// The client half of the loopback. Lines sent here reach the fake server,
/// and frames pushed by the fake server come back through `recv`.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<TransportFrame>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, line: String) -> Result<(), ConnectionError> {
        self.tx
            .send(line)
            .map_err(|e| ConnectionError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is cancel-safe.
    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>> {
        self.rx.recv().await.map(Ok)
    }

    /// Close is a no-op for channels; dropping is sufficient.
    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Connector trait
// ─────────────────────────────────────────────────────────────────────

/// Starts a fresh fake server for every connection attempt.
struct LoopbackConnector {
    opponent: UserId,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        tracing::info!("Connecting to {url} with token {token}");
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_server(self.opponent, server_rx, server_tx));
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

/// Plays black: announces itself, pushes the opening, and passes after every
/// white movement until the game is over.
async fn fake_server(
    opponent: UserId,
    mut lines: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<TransportFrame>,
) {
    let push = |line: String| {
        tracing::info!("Server sends:    {line}");
        let _ = frames.send(TransportFrame::Line(line));
    };

    let mut game = StateSnapshot::new()
        .with_moves(
            Player::White,
            vec![Movement::Place {
                unit: Unit::new(Player::White, UnitClass::Queen, 1),
                to: Position::ORIGIN,
            }],
        )
        .with_moves(Player::Black, vec![Movement::Pass]);

    push(format!("JOIN {opponent}"));
    push(format!("READY {opponent} true"));
    if let Ok(payload) = game.encode_state() {
        push(format!("STATE {payload}"));
    }

    while let Some(line) = lines.recv().await {
        tracing::info!("Server received: {line}");
        let Some(notation) = line.strip_prefix("MOV ") else {
            continue;
        };
        let played = game
            .resolve(&RelativeMovement::new(notation))
            .is_some_and(|movement| game.apply(&movement));
        if !played {
            push("ERR 101 unknown movement".to_string());
            continue;
        }
        if let Ok(payload) = game.encode_state() {
            push(format!("STATE {payload}"));
        }
        if game.has_game_ended() {
            push("WINNER ".to_string());
            let _ = frames.send(TransportFrame::Closed {
                code: 1000,
                reason: "game over".into(),
            });
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Drive the connection manager directly
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let me = uuid::Uuid::new_v4();
    let mut client = RemoteClient::<StateSnapshot>::with_connector(LoopbackConnector {
        opponent: uuid::Uuid::new_v4(),
    });
    client.prepare(
        RemoteConfig::new(Account::online(me, "demo-token")).with_url("loopback://hive/game/1"),
    );
    client.open_connection()?;

    while let Some(item) = client.next_event().await {
        match item? {
            ConnectionEvent::Connected => {
                tracing::info!("Event: Connected");
                client.send(ClientMessage::ReadyToPlay)?;
            }
            ConnectionEvent::Message(ServerMessage::GameState(game)) => {
                tracing::info!("Event: state, {} to move", game.current_player());
                if game.current_player() == Player::White && !game.has_game_ended() {
                    let next = game
                        .available_moves()
                        .first()
                        .and_then(|m| game.relative_movement(m));
                    if let Some(relative) = next {
                        client.send(ClientMessage::Movement(relative))?;
                    }
                }
            }
            ConnectionEvent::Message(ServerMessage::GameOver(winner)) => {
                tracing::info!("Event: game over, winner {winner:?}");
            }
            ConnectionEvent::Closed { reason, code } => {
                tracing::info!("Event: Closed ({code}) {reason}");
                break;
            }
            other => {
                tracing::info!("Event: {other:?}");
            }
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    client.close().await;
    tracing::info!("Done. Custom transport works!");
    Ok(())
}
