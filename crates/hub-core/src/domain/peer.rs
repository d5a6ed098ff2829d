//! Text formats used by hub discovery.
//!
//! Discovery is a two-step rendezvous:
//!
//! 1. The client broadcasts a [`Probe`] over UDP:
//!    ```text
//!    _logitech-reverse-bonjour._tcp.local.\n5446\n192.168.1.10\nstring
//!    ```
//!    i.e. service name, the TCP port the client listens on, the client's
//!    IPv4 address, and a fixed trailer.
//! 2. Each hub that hears the probe connects back to that TCP port and writes
//!    one announcement of `key:value` pairs separated by `;`, which becomes a
//!    [`DiscoveredPeer`].

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use thiserror::Error;

/// Default service name carried in the probe.
pub const DEFAULT_SERVICE_NAME: &str = "_logitech-reverse-bonjour._tcp.local.";
/// Fixed last line of every probe.
pub const PROBE_TRAILER: &str = "string";
/// Largest announcement the hub ever sends.
pub const MAX_ANNOUNCEMENT_BYTES: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeParseError {
    #[error("probe is missing the {0} line")]
    MissingLine(&'static str),

    #[error("probe listen port is not a port number: {0:?}")]
    InvalidPort(String),

    #[error("probe address is not an IPv4 address: {0:?}")]
    InvalidAddress(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerParseError {
    /// The text has no `;`, so it is not an announcement.
    #[error("not a peer announcement")]
    NotAnAnnouncement,

    #[error("announcement is missing `{0}`")]
    MissingField(&'static str),

    #[error("announcement field `{field}` has invalid value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

// ── Probe ─────────────────────────────────────────────────────────────────────

/// The UDP datagram that asks hubs to announce themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub service_name: String,
    pub listen_port: u16,
    pub address: Ipv4Addr,
}

impl Probe {
    pub fn new(service_name: impl Into<String>, listen_port: u16, address: Ipv4Addr) -> Self {
        Self {
            service_name: service_name.into(),
            listen_port,
            address,
        }
    }

    /// Renders the newline-separated ASCII probe.
    pub fn encode(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.service_name, self.listen_port, self.address, PROBE_TRAILER
        )
    }

    /// Parses a probe as a hub would.  The trailer line is optional.
    pub fn parse(text: &str) -> Result<Self, ProbeParseError> {
        let mut lines = text.lines().map(str::trim);

        let service_name = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or(ProbeParseError::MissingLine("service name"))?;
        let port = lines
            .next()
            .ok_or(ProbeParseError::MissingLine("listen port"))?;
        let address = lines
            .next()
            .ok_or(ProbeParseError::MissingLine("address"))?;

        let listen_port = port
            .parse::<u16>()
            .map_err(|_| ProbeParseError::InvalidPort(port.to_string()))?;
        let address = address
            .parse::<Ipv4Addr>()
            .map_err(|_| ProbeParseError::InvalidAddress(address.to_string()))?;

        Ok(Self::new(service_name, listen_port, address))
    }
}

// ── Peer announcement ─────────────────────────────────────────────────────────

/// A hub that answered a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// The announced `uuid`; peers are deduplicated on this.
    pub id: String,
    pub address: IpAddr,
    pub port: u16,
    /// `remoteId`, needed to open the control channel.
    pub remote_id: Option<String>,
    pub friendly_name: Option<String>,
    /// Every announced pair, including the ones lifted into fields above.
    pub properties: BTreeMap<String, String>,
}

impl DiscoveredPeer {
    /// Parses a `key:value;key:value` announcement.
    ///
    /// Keys and values are split on the first `:` only, since values such as
    /// `discoveryServerUri` contain colons themselves.  When the announcement
    /// carries no `ip`, `source` (the TCP peer address) is used instead.
    pub fn parse(text: &str, source: Option<IpAddr>) -> Result<Self, PeerParseError> {
        if !text.contains(';') {
            return Err(PeerParseError::NotAnAnnouncement);
        }

        let properties: BTreeMap<String, String> = text
            .split(';')
            .filter_map(|pair| pair.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        let id = properties
            .get("uuid")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(PeerParseError::MissingField("uuid"))?;

        let address = match properties.get("ip") {
            Some(ip) => ip.parse::<IpAddr>().map_err(|_| PeerParseError::InvalidField {
                field: "ip",
                value: ip.clone(),
            })?,
            None => source.ok_or(PeerParseError::MissingField("ip"))?,
        };

        let port = properties
            .get("port")
            .ok_or(PeerParseError::MissingField("port"))?;
        let port = port.parse::<u16>().map_err(|_| PeerParseError::InvalidField {
            field: "port",
            value: port.clone(),
        })?;

        Ok(Self {
            id,
            address,
            port,
            remote_id: properties.get("remoteId").cloned(),
            friendly_name: properties.get("friendlyName").cloned(),
            properties,
        })
    }

    /// Label for logs and listings: the friendly name, else the address.
    pub fn display_name(&self) -> String {
        self.friendly_name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}
