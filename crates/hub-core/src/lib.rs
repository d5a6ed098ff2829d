//! # hub-core
//!
//! Shared library for talking to a home-entertainment control hub: the JSON
//! wire framing, correlation ids, and the discovery text formats.
//!
//! This crate has no dependency on sockets or an async runtime; the
//! `hub-client` crate supplies those.
//!
//! # Architecture overview (for beginners)
//!
//! The hub is controlled over a single WebSocket.  Commands go out with an
//! opaque correlation id; replies come back carrying the same id, interleaved
//! with push notifications that nobody asked for.
//!
//! - **`protocol`** – Builds outbound command frames, classifies inbound
//!   frames as replies or notifications, and hands out correlation ids.
//!
//! - **`domain`** – The discovery probe and peer announcement formats, plus
//!   small typed views of the hub's configuration and state payloads.

pub mod domain;
pub mod protocol;

pub use domain::peer::{DiscoveredPeer, Probe};
pub use protocol::envelope::{Envelope, FrameError, OutboundCommand, Payload, StatusCode};
pub use protocol::correlation::{CorrelationIdGenerator, DeviceIdentity};
