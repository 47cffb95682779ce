//! Transport implementations for the Hive wire protocol.
//!
//! Concrete [`Transport`](crate::Transport) implementations live behind
//! feature gates:
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), hive_client::ConnectionError> {
//! use hive_client::transport::{Transport, TransportFrame};
//! use hive_client::WebSocketTransport;
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:8080/game/42/play").await?;
//! ws.send("GLHF".to_string()).await?;
//!
//! if let Some(Ok(TransportFrame::Line(line))) = ws.recv().await {
//!     println!("server said: {line}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
