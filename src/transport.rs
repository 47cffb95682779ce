//! Transport abstraction for the Hive wire protocol.
//!
//! The [`Transport`] trait is a bidirectional channel of text lines. Every
//! implementation handles its own framing (WebSocket text frames, newline
//! delimited TCP, in-memory channels, ...).
//!
//! Connection setup lives in the separate [`Connector`] trait because the
//! remote client has to open a fresh transport on every reconnect attempt.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use hive_client::error::ConnectionError;
//! use hive_client::transport::{Transport, TransportFrame};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, line: String) -> Result<(), ConnectionError> {
//!         // Write one protocol line
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>> {
//!         // Read the next line or close frame
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ConnectionError> {
//!         // Send a normal closure and release the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ConnectionError;

/// What a transport can hand back from [`Transport::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// One complete protocol line.
    Line(String),
    /// The peer closed the connection with a close code and reason.
    Closed { code: u16, reason: String },
}

/// A bidirectional line transport.
///
/// # Object Safety
///
/// This trait is object-safe; connectors hand out `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Dropping a pending `recv` must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one protocol line.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::TransportSend`] if the line could not be sent.
    async fn send(&mut self, line: String) -> Result<(), ConnectionError>;

    /// Receive the next frame.
    ///
    /// Returns:
    /// - `Some(Ok(frame))`: a line or a close frame
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the stream ended without a close frame
    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>>;

    /// Send a normal-closure signal and release the connection.
    ///
    /// Implementations must tolerate repeated calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are still
    /// released.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Opens transports for the remote client.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::FailedToConnect`] (or an I/O error) when the
    /// server cannot be reached.
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Transport>, ConnectionError>;
}
