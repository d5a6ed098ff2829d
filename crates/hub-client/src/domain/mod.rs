//! Client-side domain types.

pub mod config;

pub use config::{ClientConfig, ConfigError, HubEndpoint};
