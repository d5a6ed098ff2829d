//! hub-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `hubctl` binary in `main.rs` share the same module tree.
//!
//! # What does hub-client do? (for beginners)
//!
//! A control hub drives a room full of AV equipment.  It is controlled over
//! one WebSocket that carries two kinds of traffic at the same time:
//!
//! - **Replies**: every command we send carries a correlation id, and the
//!   hub's answer carries the same id back.
//! - **Notifications**: progress and state changes the hub pushes on its
//!   own, without anyone asking.
//!
//! The layers, bottom to top:
//!
//! 1. [`infrastructure::transport`] moves whole text messages over the
//!    WebSocket.
//! 2. [`infrastructure::dispatcher`] runs the single read loop.  A reply
//!    whose id is pending goes to the caller waiting for it; everything else
//!    is published on the [`infrastructure::event_bus`].
//! 3. [`application::session`] builds hub operations (sync, start an
//!    activity, press or hold a button) out of those two primitives.
//!
//! [`infrastructure::discovery`] finds hubs on the LAN before any of this:
//! it broadcasts a UDP probe and listens for the hubs' TCP call-backs.

/// Application layer: the hub session controller.
pub mod application;

/// Domain layer: client configuration.
pub mod domain;

/// Infrastructure layer: transport, dispatcher, event bus, discovery.
pub mod infrastructure;
