//! TOML configuration for `hubctl` and the client library.
//!
//! Read from `--config`/`HUB_CONFIG`, else the platform config file:
//! - Windows:  `%APPDATA%\hubctl\config.toml`
//! - Linux:    `~/.config/hubctl/config.toml`
//! - macOS:    `~/Library/Application Support/hubctl/config.toml`
//!
//! ```toml
//! [hub]
//! host = "192.168.1.20"
//! remote_id = "1234567"
//!
//! [session]
//! command_timeout_ms = 30000
//!
//! [discovery]
//! listen_port = 5446
//! ```
//!
//! Every field has a `#[serde(default = "...")]`, so a missing file or a file
//! written by an older version still yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A setting parsed but cannot work, e.g. a zero repeat interval.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

impl ClientConfig {
    /// Rejects intervals that would stall or spin the timer loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.hold_interval_ms == 0 {
            return Err(ConfigError::Invalid("session.hold_interval_ms must be > 0".into()));
        }
        if self.discovery.rebroadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery.rebroadcast_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Where the hub lives.  `host` and `remote_id` may be left out, in which
/// case `hubctl` discovers the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default = "default_hub_port")]
    pub port: u16,
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// Timing of commands, activity waits, and button repeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_activity_timeout_ms")]
    pub activity_timeout_ms: u64,
    /// Interval between "still holding" messages.
    #[serde(default = "default_hold_interval_ms")]
    pub hold_interval_ms: u64,
    /// Alternating +/- offset between repeated presses.
    #[serde(default = "default_repeat_adjustment_ms")]
    pub repeat_adjustment_ms: u64,
    #[serde(default = "default_min_press_delay_ms")]
    pub min_press_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    /// TCP port hubs connect back to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// UDP port the probe is sent to.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    #[serde(default = "default_rebroadcast_interval_ms")]
    pub rebroadcast_interval_ms: u64,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Used when the network stack refuses the broadcast send.
    #[serde(default = "default_fallback_multicast_address")]
    pub fallback_multicast_address: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_hub_port() -> u16 {
    8088
}
fn default_domain() -> String {
    "svcs.myharmony.com".to_string()
}
fn default_command_timeout_ms() -> u64 {
    30_000
}
fn default_activity_timeout_ms() -> u64 {
    60_000
}
fn default_hold_interval_ms() -> u64 {
    200
}
fn default_repeat_adjustment_ms() -> u64 {
    200
}
fn default_min_press_delay_ms() -> u64 {
    400
}
fn default_listen_port() -> u16 {
    5446
}
fn default_broadcast_port() -> u16 {
    5224
}
fn default_rebroadcast_interval_ms() -> u64 {
    5000
}
fn default_service_name() -> String {
    hub_core::domain::peer::DEFAULT_SERVICE_NAME.to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_fallback_multicast_address() -> String {
    "224.0.0.1".to_string()
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            host: None,
            remote_id: None,
            port: default_hub_port(),
            domain: default_domain(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            activity_timeout_ms: default_activity_timeout_ms(),
            hold_interval_ms: default_hold_interval_ms(),
            repeat_adjustment_ms: default_repeat_adjustment_ms(),
            min_press_delay_ms: default_min_press_delay_ms(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            broadcast_port: default_broadcast_port(),
            rebroadcast_interval_ms: default_rebroadcast_interval_ms(),
            service_name: default_service_name(),
            broadcast_address: default_broadcast_address(),
            fallback_multicast_address: default_fallback_multicast_address(),
        }
    }
}

impl SessionSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_millis(self.activity_timeout_ms)
    }

    pub fn hold_interval(&self) -> Duration {
        Duration::from_millis(self.hold_interval_ms)
    }
}

impl DiscoverySettings {
    pub fn rebroadcast_interval(&self) -> Duration {
        Duration::from_millis(self.rebroadcast_interval_ms)
    }
}

// ── Hub endpoint ──────────────────────────────────────────────────────────────

/// A fully resolved control-channel target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoint {
    pub host: String,
    pub port: u16,
    pub domain: String,
    pub remote_id: String,
}

impl HubEndpoint {
    /// `ws://{host}:{port}/?domain={domain}&hubId={remote_id}`
    pub fn url(&self) -> String {
        format!(
            "ws://{}:{}/?domain={}&hubId={}",
            self.host, self.port, self.domain, self.remote_id
        )
    }
}

impl HubSettings {
    /// Returns the endpoint when both host and remote id are known.
    pub fn endpoint(&self) -> Option<HubEndpoint> {
        Some(HubEndpoint {
            host: self.host.clone()?,
            port: self.port,
            domain: self.domain.clone(),
            remote_id: self.remote_id.clone()?,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the platform config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, returning `ClientConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if [`ClientConfig::validate`] rejects it.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: ClientConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("hubctl"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hubctl"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("hubctl")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
