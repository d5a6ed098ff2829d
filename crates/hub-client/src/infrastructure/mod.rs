//! Network-facing pieces: the transport, the command dispatcher with its
//! event bus, and LAN discovery.

pub mod discovery;
pub mod dispatcher;
pub mod event_bus;
pub mod transport;

pub use discovery::{DiscoveryError, DiscoveryService};
pub use dispatcher::{CommandDispatcher, CommandError};
pub use event_bus::{EventBus, SubscriptionHandle, WaitError};
pub use transport::{Transport, TransportError, WebSocketTransport};
