//! In-memory transport pair for driving the dispatcher without a network.
//!
//! [`MockTransport::pair`] returns the client end (a [`Transport`]) and a
//! [`MockHub`] handle that plays the hub: it sees every frame the client sent
//! and can push inbound frames or drop the connection.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hub_core::protocol::OutboundCommand;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};

pub struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
    close_signal: CancellationToken,
}

/// The hub side of a [`MockTransport`].
pub struct MockHub {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    close_signal: CancellationToken,
}

impl MockTransport {
    pub fn pair() -> (MockTransport, MockHub) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let close_signal = CancellationToken::new();

        let transport = MockTransport {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            closed: AtomicBool::new(false),
            close_signal: close_signal.clone(),
        };
        let hub = MockHub {
            sent: out_rx,
            inbound: Some(in_tx),
            close_signal,
        };
        (transport, hub)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.close_signal.cancelled() => Err(TransportError::Closed),
            next = inbound.recv() => next.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_signal.cancel();
        Ok(())
    }
}

impl MockHub {
    /// Pushes one raw inbound frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(frame.into());
        }
    }

    /// Waits for the next frame the client sent.
    pub async fn next_raw(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Waits for the next frame the client sent, parsed as a command.
    pub async fn next_command(&mut self) -> Option<OutboundCommand> {
        let raw = self.sent.recv().await?;
        OutboundCommand::parse(&raw).ok()
    }

    /// Answers `cmd` with a reply frame.
    pub fn reply(&self, cmd: &OutboundCommand, code: f64, msg: &str, data: serde_json::Value) {
        self.push(
            serde_json::json!({
                "cmd": cmd.name,
                "id": cmd.id,
                "code": code,
                "msg": msg,
                "data": data,
            })
            .to_string(),
        );
    }

    /// Ends the connection from the hub side.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// `true` once the client has closed its end.
    pub fn client_closed(&self) -> bool {
        self.close_signal.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut hub) = MockTransport::pair();

        transport.send("out".into()).await.expect("send");
        hub.push("in");

        assert_eq!(hub.next_raw().await.as_deref(), Some("out"));
        assert_eq!(transport.receive().await.expect("receive"), "in");
    }

    #[tokio::test]
    async fn test_hub_disconnect_ends_receive() {
        let (transport, mut hub) = MockTransport::pair();

        hub.disconnect();

        assert!(matches!(transport.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_client_close_unblocks_receive_and_rejects_send() {
        let (transport, hub) = MockTransport::pair();

        transport.close().await.expect("close");
        transport.close().await.expect("close again");

        assert!(hub.client_closed());
        assert!(matches!(transport.receive().await, Err(TransportError::Closed)));
        assert!(matches!(transport.send("x".into()).await, Err(TransportError::Closed)));
    }
}
