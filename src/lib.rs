//! # Hive Client
//!
//! Async client core for turn-based Hive matches.
//!
//! The crate covers the part of a game client that sits between the network
//! and the UI:
//!
//! - **Wire codec** ([`codec`]): the line-oriented `MOV`/`SET`/`MSG`/`GLHF`/`FF`
//!   protocol, translated to and from [`ClientMessage`] and [`ServerMessage`].
//! - **Connection managers** ([`client`], [`local`]): a [`RemoteClient`] over any
//!   [`Transport`] (WebSocket built in) and a [`LocalClient`] that plays an
//!   in-process opponent, both behind the [`ConnectionManager`] trait.
//! - **Turn state machine** ([`session`]): [`GameSession`] enforces the turn
//!   transition table, movement confirmation, forced passes, bounded
//!   reconnection and forfeiture.
//! - **Driver** ([`driver`]): [`SessionHandle`] runs a session against a
//!   connection in a background task.
//!
//! The rules engine stays outside: anything implementing [`GameState`] can be
//! played. [`StateSnapshot`] is a rules-free implementation used by the local
//! opponent, the demo and the tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hive_client::{
//!     GameSession, LocalClient, LocalConfig, Player, RandomOpponent, SessionConfig,
//!     SessionHandle, StateSnapshot,
//! };
//!
//! # async fn run(initial: StateSnapshot) {
//! let config = LocalConfig::new(initial, RandomOpponent::new());
//! let session = GameSession::new(SessionConfig::new(config.local_user, Player::White));
//!
//! let mut client = LocalClient::new();
//! client.prepare(config);
//!
//! let (mut handle, mut notices) = SessionHandle::start(client, session);
//! while let Some(notice) = notices.recv().await {
//!     println!("{notice}");
//! }
//! handle.shutdown().await;
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod driver;
pub mod engine;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod local;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{Account, ClientConfig, ConnectionManager, GameClient, RemoteClient, RemoteConfig};
pub use driver::{DriverConfig, Intent, SessionHandle};
pub use engine::{GameState, Movement, Player, Position, StateSnapshot, Unit, UnitClass};
pub use error::ConnectionError;
pub use error_codes::ErrorCode;
pub use event::ConnectionEvent;
pub use local::{LocalClient, LocalConfig, Opponent, RandomOpponent};
pub use protocol::{ClientMessage, OptionKey, ServerError, ServerMessage, UserId};
pub use session::{GameSession, Notice, SessionConfig, SessionState};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
