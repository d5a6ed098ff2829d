//! Protocol module: correlation ids, JSON framing, and command shapes.

pub mod commands;
pub mod correlation;
pub mod envelope;

pub use correlation::{CorrelationIdGenerator, DeviceIdentity};
pub use envelope::{Envelope, FrameError, Notification, OutboundCommand, Payload, Reply, StatusCode};
