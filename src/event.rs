//! Events delivered by a connection manager.

use crate::protocol::ServerMessage;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One item of a connection's ordered event stream.
///
/// Errors travel on the same stream as `Err(ConnectionError)` so that a
/// consumer always observes facts in the order the transport produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent<S> {
    /// The connection was established.
    Connected,
    /// `open_connection` was called while already connected; the existing
    /// stream stays in use.
    AlreadyConnected,
    /// The connection was closed, by either side.
    Closed { reason: String, code: u16 },
    /// A decoded message from the server.
    Message(ServerMessage<S>),
}

impl<S> ConnectionEvent<S> {
    /// Returns `true` for the events that confirm a live connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::AlreadyConnected)
    }

    /// Returns `true` for a close that the client asked for.
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Self::Closed { code, .. } if *code == CLOSE_NORMAL)
    }
}
