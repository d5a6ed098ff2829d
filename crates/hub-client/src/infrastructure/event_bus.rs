//! Routing of unsolicited frames to subscribers.
//!
//! Every inbound frame that does not answer a pending command ends up here.
//! Two kinds of subscriber exist:
//!
//! - **Persistent**: `subscribe(predicate, handler)` calls `handler` for every
//!   matching frame until `unsubscribe(handle)`.
//! - **One-shot**: `wait_for_one(predicate, cancel)` returns a future that
//!   resolves with the first matching frame and then unregisters itself.
//!   Canceling the token, or dropping the future, unregisters it as well.
//!
//! # Delivery guarantees
//!
//! `publish` is called only from the dispatcher's read loop, so frames are
//! delivered in arrival order.  Each subscriber registered when a frame is
//! published sees that frame exactly once.  Predicates run while the
//! subscriber list is locked and must be cheap; handlers run after the lock
//! is released, on the read loop, and must not block (forward to a channel
//! instead).
//!
//! When the session's connection ends the bus is closed: pending one-shot
//! waiters fail with [`WaitError::Closed`] and later waits fail immediately.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hub_core::protocol::Envelope;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait canceled")]
    Canceled,

    /// The bus closed because the connection ended.
    #[error("event bus closed")]
    Closed,
}

/// Identifies one persistent subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Predicate = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

enum Subscriber {
    Persistent { predicate: Predicate, handler: Handler },
    OneShot { predicate: Predicate, tx: oneshot::Sender<Envelope> },
}

impl Subscriber {
    fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Subscriber::Persistent { predicate, .. } | Subscriber::OneShot { predicate, .. } => {
                predicate(envelope)
            }
        }
    }
}

enum Delivery {
    Call(Handler),
    Resolve(oneshot::Sender<Envelope>),
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<(u64, Subscriber)>,
    closed: bool,
}

/// Cloneable handle to one shared subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, subscriber: Subscriber) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, subscriber));
        Some(id)
    }

    fn remove(&self, id: u64) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
        state.subscribers.len() != before
    }

    /// Registers `handler` for every frame matching `predicate`.
    ///
    /// On a closed bus the handle is returned but the handler never runs.
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionHandle
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
        H: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self
            .register(Subscriber::Persistent {
                predicate: Box::new(predicate),
                handler: Arc::new(handler),
            })
            .unwrap_or(u64::MAX);
        SubscriptionHandle(id)
    }

    /// Removes a persistent subscription.  Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.remove(handle.0)
    }

    /// Registers a one-shot waiter for the first frame matching `predicate`.
    ///
    /// Registration happens immediately, before the returned future is first
    /// polled, so a frame published in between is not missed.  The future
    /// owns the registration from the start: dropping it unpolled unregisters.
    pub fn wait_for_one<P>(
        &self,
        predicate: P,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Envelope, WaitError>> + Send + 'static
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let registered = self.register(Subscriber::OneShot {
            predicate: Box::new(predicate),
            tx,
        });
        let registration = registered.map(|id| Registration {
            bus: self.clone(),
            id,
        });

        async move {
            let Some(_registration) = registration else {
                return Err(WaitError::Closed);
            };

            tokio::select! {
                biased;
                delivered = rx => delivered.map_err(|_| WaitError::Closed),
                _ = cancel.cancelled() => Err(WaitError::Canceled),
            }
        }
    }

    /// Delivers `envelope` to every matching subscriber.
    pub fn publish(&self, envelope: &Envelope) {
        let mut deliveries = Vec::new();
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let mut index = 0;
            while index < state.subscribers.len() {
                if !state.subscribers[index].1.matches(envelope) {
                    index += 1;
                    continue;
                }
                if let Subscriber::Persistent { handler, .. } = &state.subscribers[index].1 {
                    deliveries.push(Delivery::Call(Arc::clone(handler)));
                    index += 1;
                } else if let (_, Subscriber::OneShot { tx, .. }) = state.subscribers.remove(index) {
                    deliveries.push(Delivery::Resolve(tx));
                }
            }
        }

        trace!(
            topic = envelope.topic(),
            subscribers = deliveries.len(),
            "publishing frame"
        );

        for delivery in deliveries {
            match delivery {
                Delivery::Call(handler) => handler(envelope),
                // A receiver that went away was canceled; nothing to do.
                Delivery::Resolve(tx) => {
                    let _ = tx.send(envelope.clone());
                }
            }
        }
    }

    /// Closes the bus.  Pending one-shot waiters fail with [`WaitError::Closed`].
    pub fn close(&self) {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.subscribers)
        };
        // Dropping the one-shot senders outside the lock wakes their waiters.
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of live subscriptions, persistent and one-shot.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Unregisters a one-shot waiter when its future completes or is dropped.
struct Registration {
    bus: EventBus,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}
