//! Bounded discovery phase.
//!
//! Nodes announce themselves by broadcasting an [`Advertisement`] on a
//! well-known UDP port. The listener collects advertisements for a fixed
//! wall-clock window and records each sender in the [`NodeRegistry`].

use crate::error::DiscoveryError;
use crate::registry::NodeRegistry;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tessie_core::Advertisement;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const RECV_BUFFER_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    pub port: u16,
    /// Overall length of the discovery phase.
    pub window: Duration,
    /// Silence longer than this ends the phase early.
    pub receive_timeout: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub accepted: usize,
    pub rejected: usize,
}

pub struct DiscoveryListener {
    socket: UdpSocket,
    config: DiscoveryConfig,
}

impl DiscoveryListener {
    /// Opens the broadcast-capable receive socket with address reuse enabled.
    /// A failure here is not retried.
    pub fn bind(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        let socket = open_socket(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;
        Ok(Self { socket, config })
    }

    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|addr| addr.port())
    }

    /// Runs the discovery window, feeding every decodable advertisement into
    /// `registry`. Malformed datagrams are skipped.
    pub async fn listen(&self, registry: &mut NodeRegistry) -> DiscoveryStats {
        let deadline = Instant::now() + self.config.window;
        let mut buf = vec![0u8; RECV_BUFFER_BYTES];
        let mut stats = DiscoveryStats::default();

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("Listening completed");
                break;
            }
            let wait = self.config.receive_timeout.min(deadline - now);

            let (len, from) = match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!("Discovery socket error: {}", e);
                    break;
                }
                Err(_) => {
                    debug!("No advertisement within {:?}, ending discovery", wait);
                    break;
                }
            };

            match Advertisement::decode(&buf[..len]) {
                Ok(ad) => {
                    let node = registry.update(from.ip(), ad);
                    stats.accepted += 1;
                    info!(
                        address = %node.address,
                        status = %node.status,
                        free_spiffs = node.free_spiffs_bytes,
                        rssi = node.rssi,
                        "Node found: {}",
                        node.name
                    );
                }
                Err(e) => {
                    stats.rejected += 1;
                    warn!(
                        address = %from.ip(),
                        "Received invalid advertisement ({}): {}",
                        e,
                        String::from_utf8_lossy(&buf[..len])
                    );
                }
            }
        }

        stats
    }
}

fn open_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Binds, listens for one window, and returns what was heard.
pub async fn discover(config: DiscoveryConfig) -> Result<NodeRegistry, DiscoveryError> {
    let listener = DiscoveryListener::bind(config)?;
    info!(
        "Listening for node broadcasts on port {}...",
        listener.local_port().unwrap_or(config.port)
    );
    let mut registry = NodeRegistry::new();
    let stats = listener.listen(&mut registry).await;
    info!(
        nodes = registry.len(),
        accepted = stats.accepted,
        rejected = stats.rejected,
        "Discovery finished"
    );
    Ok(registry)
}
