//! Domain types: discovery formats and the typed hub payload views.

pub mod functions;
pub mod hub;
pub mod peer;

pub use functions::StandardFunction;

pub use hub::{
    Activity, ActivityFinished, ActivityProgress, ControlGroup, Controllable, Device,
    FixActivityAction, Function, HubConfiguration, Sequence, StateDigest,
};
pub use peer::{DiscoveredPeer, PeerParseError, Probe, ProbeParseError};
