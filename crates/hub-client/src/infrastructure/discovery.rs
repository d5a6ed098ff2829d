//! Finding hubs on the local network.
//!
//! # How hub discovery works (for beginners)
//!
//! Hubs do not answer a broadcast directly.  Instead:
//!
//! 1. The client opens a TCP listener (default port 5446).
//! 2. Every few seconds it broadcasts a UDP [`Probe`] to port 5224 saying
//!    "I am at 192.168.1.10, call me back on 5446".
//! 3. Each hub that hears the probe opens a TCP connection to that listener
//!    and writes one `key:value;key:value;...` announcement (at most 1024
//!    bytes), which becomes a [`DiscoveredPeer`].
//!
//! If the network stack rejects the broadcast send (some hosts forbid
//! `255.255.255.255`), the probe is sent to a multicast address instead.
//!
//! # Lifecycle
//!
//! `Idle → Running → Stopped`, and `Stopped → Running` again on a new
//! [`start`](DiscoveryService::start).  The broadcast timer and the listener
//! are two independent tasks sharing one cancellation token; `stop` cancels
//! both.  A blocked `accept` is unblocked by that cancellation, not by an
//! error.
//!
//! The discovered-peer set is reset at every start and only grows during a
//! run.  Peers are deduplicated on their announced `uuid`.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hub_core::domain::peer::{DiscoveredPeer, PeerParseError, Probe, MAX_ANNOUNCEMENT_BYTES};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::DiscoverySettings;

/// How long an accepted connection may take to deliver its announcement.
const ANNOUNCEMENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No local IPv4 address could be determined, so there is nothing to
    /// put in the probe.
    #[error("no usable network adapter found")]
    NoNetworkAdapter,

    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid discovery address {0:?}")]
    InvalidAddress(String),

    #[error("discovery is already running")]
    AlreadyRunning,

    #[error("rebroadcast interval must be greater than zero")]
    ZeroRebroadcastInterval,
}

// ── Local address lookup ──────────────────────────────────────────────────────

/// Source of the IPv4 address advertised in the probe.
#[cfg_attr(test, mockall::automock)]
pub trait LocalAddressSource: Send + Sync {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Asks the OS which interface would route to a public address.
///
/// Connecting a UDP socket sends no packets; it only selects a route, whose
/// source address is then read back.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoutedAddressSource;

impl LocalAddressSource for RoutedAddressSource {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket
            .connect(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80))
            .ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
            _ => None,
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

enum DiscoveryState {
    Idle,
    Running {
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    },
    Stopped,
}

#[derive(Default)]
struct PeerSet {
    seen: HashSet<String>,
    peers: Vec<DiscoveredPeer>,
}

pub struct DiscoveryService {
    settings: DiscoverySettings,
    addresses: Arc<dyn LocalAddressSource>,
    state: tokio::sync::Mutex<DiscoveryState>,
    peers: Arc<Mutex<PeerSet>>,
    found_tx: broadcast::Sender<DiscoveredPeer>,
    /// Parent of every run's token; cancelled on drop.
    root: CancellationToken,
}

impl DiscoveryService {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self::with_address_source(settings, Arc::new(RoutedAddressSource))
    }

    pub fn with_address_source(
        settings: DiscoverySettings,
        addresses: Arc<dyn LocalAddressSource>,
    ) -> Self {
        let (found_tx, _) = broadcast::channel(64);
        Self {
            settings,
            addresses,
            state: tokio::sync::Mutex::new(DiscoveryState::Idle),
            peers: Arc::new(Mutex::new(PeerSet::default())),
            found_tx,
            root: CancellationToken::new(),
        }
    }

    /// Receives every newly found peer, once per peer per run.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveredPeer> {
        self.found_tx.subscribe()
    }

    /// Peers found in the current (or last) run, in discovery order.
    pub fn peers(&self) -> Vec<DiscoveredPeer> {
        lock_peers(&self.peers).peers.clone()
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, DiscoveryState::Running { .. })
    }

    /// Binds the listener and starts broadcasting probes.
    ///
    /// Returns the address the listener is bound to.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::AlreadyRunning`] if a run is in progress.
    /// - [`DiscoveryError::NoNetworkAdapter`] if no local IPv4 address is
    ///   available; nothing is bound in that case.
    /// - [`DiscoveryError::BindFailed`] if the TCP listener or the UDP socket
    ///   cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, DiscoveryError> {
        let mut state = self.state.lock().await;
        if matches!(*state, DiscoveryState::Running { .. }) {
            return Err(DiscoveryError::AlreadyRunning);
        }
        if self.settings.rebroadcast_interval().is_zero() {
            return Err(DiscoveryError::ZeroRebroadcastInterval);
        }

        let local_ip = self
            .addresses
            .local_ipv4()
            .ok_or(DiscoveryError::NoNetworkAdapter)?;

        let broadcast_target = self.target(&self.settings.broadcast_address)?;
        let fallback_target = self.target(&self.settings.fallback_multicast_address)?;

        let listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.settings.listen_port));
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                addr: listen_addr,
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| DiscoveryError::BindFailed {
                addr: listen_addr,
                source,
            })?;

        let udp_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(udp_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                addr: udp_addr,
                source,
            })?;
        if let Err(e) = socket.set_broadcast(true) {
            warn!("could not enable broadcast on probe socket: {e}");
        }

        {
            let mut peers = lock_peers(&self.peers);
            peers.seen.clear();
            peers.peers.clear();
        }

        let probe = Probe::new(self.settings.service_name.clone(), bound.port(), local_ip);
        let cancel = self.root.child_token();

        let broadcaster = tokio::spawn(broadcast_loop(
            socket,
            probe.encode(),
            broadcast_target,
            fallback_target,
            self.settings.rebroadcast_interval(),
            cancel.clone(),
        ));
        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.peers),
            self.found_tx.clone(),
            cancel.clone(),
        ));

        *state = DiscoveryState::Running {
            cancel,
            tasks: vec![broadcaster, acceptor],
        };
        info!("discovery started: listening on TCP {bound}, probing as {local_ip}");
        Ok(bound)
    }

    /// Stops broadcasting and closes the listener.  A no-op when not running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, DiscoveryState::Stopped);
        match previous {
            DiscoveryState::Running { cancel, tasks } => {
                cancel.cancel();
                for task in tasks {
                    if let Err(e) = task.await {
                        warn!("discovery task ended abnormally: {e}");
                    }
                }
                info!("discovery stopped");
            }
            other => *state = other,
        }
    }

    fn target(&self, address: &str) -> Result<SocketAddr, DiscoveryError> {
        let ip: Ipv4Addr = address
            .parse()
            .map_err(|_| DiscoveryError::InvalidAddress(address.to_string()))?;
        Ok(SocketAddr::from((ip, self.settings.broadcast_port)))
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn lock_peers(peers: &Mutex<PeerSet>) -> MutexGuard<'_, PeerSet> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn broadcast_loop(
    socket: UdpSocket,
    probe: String,
    broadcast_target: SocketAddr,
    fallback_target: SocketAddr,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => send_probe(&socket, probe.as_bytes(), broadcast_target, fallback_target).await,
        }
    }
    debug!("probe broadcast stopped");
}

async fn send_probe(socket: &UdpSocket, probe: &[u8], target: SocketAddr, fallback: SocketAddr) {
    match socket.send_to(probe, target).await {
        Ok(_) => debug!("probe sent to {target}"),
        Err(e) => {
            warn!("probe broadcast to {target} rejected ({e}); retrying via {fallback}");
            if let Err(e) = socket.send_to(probe, fallback).await {
                warn!("probe multicast to {fallback} failed: {e}");
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<Mutex<PeerSet>>,
    found_tx: broadcast::Sender<DiscoveredPeer>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                tokio::spawn(handle_announcement(
                    stream,
                    remote,
                    Arc::clone(&peers),
                    found_tx.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => warn!("discovery accept failed: {e}"),
        }
    }
    debug!("discovery listener closed");
}

/// Reads one announcement from `stream` and records the peer if it is new.
async fn handle_announcement(
    mut stream: TcpStream,
    remote: SocketAddr,
    peers: Arc<Mutex<PeerSet>>,
    found_tx: broadcast::Sender<DiscoveredPeer>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_ANNOUNCEMENT_BYTES];
    let read = tokio::select! {
        _ = cancel.cancelled() => return,
        read = tokio::time::timeout(ANNOUNCEMENT_READ_TIMEOUT, stream.read(&mut buf)) => read,
    };
    let len = match read {
        Ok(Ok(len)) => len,
        Ok(Err(e)) => {
            debug!("announcement read from {remote} failed: {e}");
            return;
        }
        Err(_) => {
            debug!("announcement from {remote} timed out");
            return;
        }
    };

    let text = String::from_utf8_lossy(&buf[..len]);
    let peer = match DiscoveredPeer::parse(&text, Some(remote.ip())) {
        Ok(peer) => peer,
        Err(PeerParseError::NotAnAnnouncement) => {
            debug!("ignoring non-announcement from {remote}");
            return;
        }
        Err(e) => {
            warn!("bad announcement from {remote}: {e}");
            return;
        }
    };

    if record_peer(&peers, &peer) {
        info!("found hub {} at {} ({})", peer.display_name(), peer.address, peer.id);
        // No receivers is fine; `peers()` still has it.
        let _ = found_tx.send(peer);
    } else {
        debug!("hub {} announced again", peer.id);
    }
}

/// Adds `peer` unless its id was already seen.  Returns `true` when added.
fn record_peer(peers: &Mutex<PeerSet>, peer: &DiscoveredPeer) -> bool {
    let mut set = lock_peers(peers);
    if !set.seen.insert(peer.id.clone()) {
        return false;
    }
    set.peers.push(peer.clone());
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
