//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries protocol lines in WebSocket text frames.
//! A frame may hold several newline-separated lines; they are handed out one
//! at a time. Both `ws://` and `wss://` URLs are supported.
//!
//! [`WebSocketConnector`] is the default [`Connector`] for the remote client.
//! It attaches the account token as a bearer `Authorization` header.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is
//! enabled (it is enabled by default).

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::error::ConnectionError;
use crate::event::CLOSE_NORMAL;
use crate::transport::{Connector, Transport, TransportFrame};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: lines split out of a frame are
/// buffered on the transport, not in the future.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    pending: VecDeque<String>,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to `url` without credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Io`] if the URL is invalid or the connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        Self::connect_with_token(url, None).await
    }

    /// Establish a new WebSocket connection, optionally sending a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::FailedToConnect`] if the token is not a valid
    /// header value, or [`ConnectionError::Io`] if the connection fails.
    pub async fn connect_with_token(
        url: &str,
        token: Option<&str>,
    ) -> Result<Self, ConnectionError> {
        tracing::debug!(url = %url, "connecting to WebSocket server");

        let mut request = url.into_client_request().map_err(io_error)?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectionError::FailedToConnect(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(io_error)?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

/// Preserve the I/O error kind when tungstenite reports one.
fn io_error(e: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    ConnectionError::Io(std::io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, line: String) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::TransportClosed);
        }
        self.stream
            .send(Message::Text(line.into()))
            .await
            .map_err(|e| ConnectionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(TransportFrame::Line(line)));
            }

            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(ConnectionError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => {
                    self.pending.extend(
                        text.as_str()
                            .lines()
                            .filter(|line| !line.is_empty())
                            .map(str::to_string),
                    );
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (CLOSE_NORMAL, String::new()),
                    };
                    return Some(Ok(TransportFrame::Closed { code, reason }));
                }
                Message::Ping(_) => {
                    tracing::debug!("received WebSocket ping (auto-pong handled by tungstenite)");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::from("client closed").into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ConnectionError::TransportSend(e.to_string()))
    }
}

/// The default [`Connector`]: opens a [`WebSocketTransport`] per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        let token = (!token.is_empty()).then_some(token);
        let transport = WebSocketTransport::connect_with_token(url, token).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        let err = result.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_splits_lines_within_a_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("JOIN a\nLEAVE b\n".into()))
                .await
                .unwrap();
            ws.send(Message::Text("WINNER".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        for expected in ["JOIN a", "LEAVE b", "WINNER"] {
            let frame = transport.recv().await.unwrap().unwrap();
            assert_eq!(frame, TransportFrame::Line(expected.into()));
        }
    }

    #[tokio::test]
    async fn recv_reports_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: String::from("server restart").into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(
            frame,
            TransportFrame::Closed {
                code: 1001,
                reason: "server restart".into()
            }
        );
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("GLHF".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, TransportFrame::Line("GLHF".into()));
    }

    #[tokio::test]
    async fn connector_sends_bearer_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<Option<String>>();

        tokio::spawn(async move {
            use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let seen = req
                    .headers()
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = seen_tx.send(seen);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut transport = WebSocketConnector
            .connect(&format!("ws://{addr}"), "secret-token")
            .await
            .unwrap();
        assert_eq!(
            seen_rx.await.unwrap().as_deref(),
            Some("Bearer secret-token")
        );
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("FF".to_string()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send("MSG hello there".to_string()).await.unwrap();

        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, TransportFrame::Line("MSG hello there".into()));
    }
}
