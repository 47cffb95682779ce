//! Error types for the Hive client.

use thiserror::Error;

/// Errors reported by a connection manager.
///
/// Variants split into two families:
///
/// - **configuration errors** ([`NotPrepared`](Self::NotPrepared),
///   [`MissingUrl`](Self::MissingUrl), [`UsingOfflineAccount`](Self::UsingOfflineAccount))
///   are caller mistakes and are never retried;
/// - **transport errors** (everything else) may be retried by the owner of
///   the reconnect policy.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The configured account cannot be used for a network game.
    #[error("cannot connect with an offline account")]
    UsingOfflineAccount,

    /// `open_connection` or `reconnect` was called before `prepare`.
    #[error("connection manager has not been prepared")]
    NotPrepared,

    /// No server address was configured.
    #[error("missing server URL")]
    MissingUrl,

    /// The transport could not be established.
    #[error("failed to connect: {0}")]
    FailedToConnect(String),

    /// Failed to send a line through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a line from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Attempted to send without an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Failed to serialize or deserialize a game state payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Returns `true` for errors caused by a missing or invalid setup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UsingOfflineAccount | Self::NotPrepared | Self::MissingUrl
        )
    }

    /// Returns `true` if a fresh connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !self.is_configuration()
    }
}

/// A specialized [`Result`] type for Hive client operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_retryable() {
        for err in [
            ConnectionError::UsingOfflineAccount,
            ConnectionError::NotPrepared,
            ConnectionError::MissingUrl,
        ] {
            assert!(err.is_configuration(), "{err} should be configuration");
            assert!(!err.is_retryable(), "{err} should not be retried");
        }
    }

    #[test]
    fn transport_errors_are_retryable() {
        for err in [
            ConnectionError::FailedToConnect("refused".into()),
            ConnectionError::TransportReceive("reset".into()),
            ConnectionError::TransportClosed,
            ConnectionError::Timeout,
        ] {
            assert!(err.is_retryable(), "{err} should be retried");
        }
    }
}
