//! Command/reply correlation over one transport.
//!
//! # How replies find their caller
//!
//! 1. `send` builds a frame with a fresh correlation id and registers a
//!    oneshot channel under that id in the pending table, *before* writing the
//!    frame, so even an instant reply finds its waiter.
//! 2. A single background read loop decodes every inbound frame:
//!    - reply whose id is pending: the entry is removed and resolved
//!      (first match wins);
//!    - reply whose id was pending but already resolved, canceled or timed
//!      out: dropped silently;
//!    - anything else: published on the [`EventBus`].
//! 3. Undecodable frames are logged and skipped.  They never stop the loop.
//!
//! Only the last 256 resolved ids are remembered.  A late reply for an id
//! older than that window is indistinguishable from a notification and is
//! published on the bus like any other unsolicited frame.
//!
//! When the transport fails or closes, every pending request fails with
//! [`CommandError::Connection`], the event bus is closed, and later sends
//! fail immediately: a session does not reconnect.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hub_core::protocol::{
    CorrelationIdGenerator, Envelope, FrameError, OutboundCommand, Reply, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_bus::EventBus;
use super::transport::Transport;

/// How many resolved ids are remembered so their late duplicates can be
/// told apart from genuine notifications.
const RETIRED_ID_CAPACITY: usize = 256;

/// Outcome of a single command, local to its caller.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The connection failed or was closed; terminal for the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// The hub answered with a non-2xx status.
    #[error("hub returned status {code}: {message}")]
    Protocol { code: StatusCode, message: String },

    #[error("command timed out")]
    Timeout,

    #[error("command canceled")]
    Canceled,

    #[error(transparent)]
    Encode(#[from] FrameError),

    #[error("could not decode reply payload: {0}")]
    Decode(#[source] serde_json::Error),
}

type Completion = oneshot::Sender<Result<Reply, CommandError>>;

/// Bounded FIFO set of ids that are no longer pending.
#[derive(Default)]
struct RetiredIds {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl RetiredIds {
    fn insert(&mut self, id: String) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > RETIRED_ID_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }
}

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<String, Completion>,
    retired: RetiredIds,
    /// Set once the connection has ended; the reason is reported to callers.
    closed: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    ids: CorrelationIdGenerator,
    pending: Mutex<PendingTable>,
    bus: EventBus,
    shutdown: CancellationToken,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Sends commands and routes every inbound frame.  Cheap to clone.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

impl CommandDispatcher {
    /// Starts the read loop over `transport`.  Must be called inside a Tokio
    /// runtime.
    pub fn start(transport: Arc<dyn Transport>, ids: CorrelationIdGenerator) -> Self {
        let inner = Arc::new(Inner {
            transport,
            ids,
            pending: Mutex::new(PendingTable::default()),
            bus: EventBus::new(),
            shutdown: CancellationToken::new(),
            read_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(Arc::clone(&inner)));
        *lock_ignoring_poison(&inner.read_loop) = Some(handle);

        Self { inner }
    }

    /// The bus receiving every frame that answers no pending command.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Builds a command with a fresh correlation id.
    pub fn command<P: Serialize + ?Sized>(
        &self,
        name: &str,
        params: &P,
    ) -> Result<OutboundCommand, CommandError> {
        Ok(OutboundCommand::new(name, self.inner.ids.next_id(), params)?)
    }

    /// Sends `name` with `params` and waits for the matching reply.
    pub async fn send_command<P: Serialize + ?Sized>(
        &self,
        name: &str,
        params: &P,
        cancel: &CancellationToken,
    ) -> Result<Reply, CommandError> {
        let cmd = self.command(name, params)?;
        self.send(cmd, cancel).await
    }

    /// Like [`send_command`](Self::send_command), failing with
    /// [`CommandError::Timeout`] after `timeout`.
    pub async fn send_command_timeout<P: Serialize + ?Sized>(
        &self,
        name: &str,
        params: &P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Reply, CommandError> {
        let cmd = self.command(name, params)?;
        tokio::time::timeout(timeout, self.send(cmd, cancel))
            .await
            .map_err(|_| CommandError::Timeout)?
    }

    /// Sends a prepared command and waits for its reply.
    ///
    /// A 2xx reply resolves to `Ok`; any other status resolves to
    /// [`CommandError::Protocol`].  Canceling `cancel` or dropping the
    /// returned future withdraws the request without affecting others.
    pub async fn send(
        &self,
        cmd: OutboundCommand,
        cancel: &CancellationToken,
    ) -> Result<Reply, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Canceled);
        }
        let text = cmd.encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.inner.lock_pending();
            if let Some(reason) = &table.closed {
                return Err(CommandError::Connection(reason.clone()));
            }
            table.waiting.insert(cmd.id.clone(), tx);
        }
        let _pending = PendingGuard {
            inner: &self.inner,
            id: &cmd.id,
        };

        debug!(command = %cmd.name, id = %cmd.id, "sending command");
        self.inner
            .transport
            .send(text)
            .await
            .map_err(|e| CommandError::Connection(e.to_string()))?;

        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(CommandError::Connection("dispatcher stopped".to_string()))
            }),
            _ = cancel.cancelled() => Err(CommandError::Canceled),
        }
    }

    /// Sends a command without registering for its reply.
    ///
    /// Any reply then reaches the [`EventBus`] like a notification, which is
    /// how activity changes observe their own progress frames.
    pub async fn fire(&self, cmd: &OutboundCommand) -> Result<(), CommandError> {
        if let Some(reason) = &self.inner.lock_pending().closed {
            return Err(CommandError::Connection(reason.clone()));
        }
        let text = cmd.encode()?;
        debug!(command = %cmd.name, id = %cmd.id, "firing command");
        self.inner
            .transport
            .send(text)
            .await
            .map_err(|e| CommandError::Connection(e.to_string()))
    }

    /// Number of commands still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().waiting.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_pending().closed.is_some()
    }

    /// Closes the transport and stops the read loop.  Idempotent.
    ///
    /// Every pending request fails with [`CommandError::Connection`].
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.transport.close().await {
            warn!("error closing transport: {e}");
        }
        self.inner.shutdown.cancel();

        let handle = lock_ignoring_poison(&self.inner.read_loop).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("read loop ended abnormally: {e}");
            }
        }
    }
}

/// Decodes a reply payload into `T`.
pub fn decode_reply<T: DeserializeOwned>(reply: &Reply) -> Result<T, CommandError> {
    reply.payload.decode().map_err(CommandError::Decode)
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        lock_ignoring_poison(&self.pending)
    }

    /// Resolves a pending request or forwards the frame to the bus.
    fn route(&self, envelope: Envelope) {
        if let Envelope::Reply(reply) = &envelope {
            let mut table = self.lock_pending();
            if let Some(completion) = table.waiting.remove(&reply.id) {
                table.retired.insert(reply.id.clone());
                drop(table);

                debug!(command = %reply.command, id = %reply.id, code = %reply.code, "reply matched");
                let outcome = if reply.code.is_success() {
                    Ok(reply.clone())
                } else {
                    Err(CommandError::Protocol {
                        code: reply.code,
                        message: reply.message.clone(),
                    })
                };
                // The caller may have given up in the meantime.
                let _ = completion.send(outcome);
                return;
            }
            if table.retired.contains(&reply.id) {
                debug!(id = %reply.id, "dropping frame for a request that is no longer pending");
                return;
            }
        }

        debug!(topic = envelope.topic(), code = %envelope.code(), "publishing frame");
        self.bus.publish(&envelope);
    }

    /// Fails every pending request and refuses new ones.
    fn fail_all(&self, reason: &str) {
        let drained: Vec<(String, Completion)> = {
            let mut table = self.lock_pending();
            table.closed.get_or_insert_with(|| reason.to_string());
            let drained: Vec<_> = table.waiting.drain().collect();
            for (id, _) in &drained {
                table.retired.insert(id.clone());
            }
            drained
        };

        for (_, completion) in drained {
            let _ = completion.send(Err(CommandError::Connection(reason.to_string())));
        }
    }
}

/// Removes a request from the pending table when its caller stops waiting.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.inner.lock_pending();
        if table.waiting.remove(self.id).is_some() {
            table.retired.insert(self.id.to_string());
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop(inner: Arc<Inner>) {
    let reason = loop {
        let received = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break "session closed".to_string(),
            received = inner.transport.receive() => received,
        };

        let text = match received {
            Ok(text) => text,
            Err(e) => {
                error!("transport failed: {e}");
                break e.to_string();
            }
        };

        match Envelope::decode(&text) {
            Ok(envelope) => inner.route(envelope),
            Err(e) => warn!("skipping malformed frame: {e}"),
        }
    };

    info!("read loop stopped: {reason}");
    inner.fail_all(&reason);
    inner.bus.close();
}
