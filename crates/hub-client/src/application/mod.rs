//! Application layer: hub operations composed from the infrastructure.

pub mod session;

pub use session::{HubSession, SessionError};
