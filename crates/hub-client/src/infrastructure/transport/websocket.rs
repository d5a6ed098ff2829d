//! WebSocket connection to the hub's control endpoint.
//!
//! # Framing
//!
//! The hub speaks JSON text messages.  A message may arrive split over several
//! WebSocket frames (continuation frames); `tungstenite` accumulates them until
//! the FIN bit and only then yields the complete message, so [`receive`]
//! always returns whole messages.
//!
//! # Locking
//!
//! The stream is split into a sink and a stream half, each behind its own
//! `tokio::sync::Mutex`:
//!
//! - The sink lock is the one-at-a-time send guard.  It is a scoped guard, so
//!   it is released on every exit path, including a failed send.
//! - The stream lock is only ever taken by the dispatcher's read loop.
//!
//! [`receive`]: Transport::receive

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Opens the WebSocket at `url` (`ws://host:port/?domain=...&hubId=...`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the TCP connection or the
    /// WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|source| TransportError::Connect {
                url: url.to_string(),
                source,
            })?;

        info!("connected to hub at {url}");

        let (sink, stream) = ws.split();
        Ok(Self {
            url: url.to_string(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("connection to {} marked closed", self.url);
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut sink = self.sink.lock().await;
        match sink.send(Message::Text(text)).await {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                self.mark_closed();
                Err(TransportError::Closed)
            }
            Err(e) => Err(TransportError::Send(e)),
        }
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    // The hub never sends binary; pass it on so the dispatcher
                    // can reject it as a malformed frame.
                    return Ok(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("hub sent close frame: {frame:?}");
                    self.mark_closed();
                    return Err(TransportError::Closed);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.mark_closed();
                    return Err(TransportError::Closed);
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::Receive(e));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                info!("closed connection to {}", self.url);
                Ok(())
            }
            Err(e) => {
                warn!("error while closing connection to {}: {e}", self.url);
                Err(TransportError::Send(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Accepts one WebSocket client and runs `script` against it.
    async fn spawn_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let ws = accept_async(tcp).await.expect("handshake");
            script(ws).await;
        });
        format!("ws://{addr}/?domain=svcs.myharmony.com&hubId=1")
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_error() {
        // Arrange: bind then drop a listener so the port refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        // Act
        let result = WebSocketTransport::connect(&format!("ws://{addr}/")).await;

        // Assert
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_send_and_receive_text() {
        let url = spawn_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(format!("echo:{text}"))).await.expect("reply");
            }
            let _ = ws.next().await;
        })
        .await;
        let transport = WebSocketTransport::connect(&url).await.expect("connect");

        transport.send("hello".into()).await.expect("send");
        let reply = transport.receive().await.expect("receive");

        assert_eq!(reply, "echo:hello");
    }

    #[tokio::test]
    async fn test_server_close_surfaces_as_closed() {
        let url = spawn_server(|mut ws| async move {
            ws.close(None).await.expect("close");
        })
        .await;
        let transport = WebSocketTransport::connect(&url).await.expect("connect");

        let err = transport.receive().await.unwrap_err();

        assert!(matches!(err, TransportError::Closed));
        assert!(matches!(
            transport.send("late".into()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let url = spawn_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        let transport = WebSocketTransport::connect(&url).await.expect("connect");

        transport.close().await.expect("first close");
        transport.close().await.expect("second close");

        assert!(matches!(
            transport.send("x".into()).await,
            Err(TransportError::Closed)
        ));
    }
}
