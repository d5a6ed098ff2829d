//! The duplex text-message connection to a hub.
//!
//! [`Transport`] is the seam between the dispatcher and the network.  The
//! production implementation is [`WebSocketTransport`]; [`MockTransport`]
//! keeps everything in memory so the dispatcher and session can be driven
//! from tests without a socket.

pub mod mock;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;

pub use mock::{MockHub, MockTransport};
pub use websocket::WebSocketTransport;

/// Error type for transport operations.  Every variant is terminal for the
/// session that produced it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] tokio_tungstenite::tungstenite::Error),

    /// The connection was closed, by either side.
    #[error("connection closed")]
    Closed,
}

/// One persistent duplex connection carrying complete text messages.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transmits one complete message.
    ///
    /// Concurrent callers are serialized; a message is never interleaved with
    /// another.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Waits for the next complete inbound message.
    ///
    /// Intended for a single reader.  Returns [`TransportError::Closed`] once
    /// the connection has ended.
    async fn receive(&self) -> Result<String, TransportError>;

    /// Closes the connection.  Calling it again, or after a failure, is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}
