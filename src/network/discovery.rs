//! LAN peer discovery via UDP broadcast.
//!
//! The [`DiscoveryBeacon`] runs two loops over one socket bound to the
//! discovery port: an announcer that broadcasts our [`Announcement`] every
//! few seconds, and a listener that turns every well-formed announcement it
//! hears into a [`PeerRegistry`] upsert. Announcements are plain JSON; nothing
//! on this port is encrypted.

use crate::network::{Peer, PeerRegistry};
use crate::utils::{NetworkConfig, NetworkError, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Largest announcement we are prepared to read
const MAX_ANNOUNCEMENT_SIZE: usize = 4096;

/// Self-description broadcast on the discovery port.
///
/// Field names match the wire format used by existing peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    /// Sender identity
    #[serde(rename = "ID")]
    pub id: String,
    /// Self-reported address. Ignored on receipt.
    #[serde(rename = "Address", default)]
    pub address: String,
    /// Sender's clock at broadcast time
    #[serde(rename = "LastSeen")]
    pub last_seen: chrono::DateTime<chrono::Utc>,
    /// Always true when sent
    #[serde(rename = "Connected", default)]
    pub connected: bool,
}

impl Announcement {
    /// Announcement for `id`, stamped now
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            last_seen: chrono::Utc::now(),
            connected: true,
        }
    }

    /// Encode as a discovery datagram
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a discovery datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ProtocolError::InvalidMessage {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Registry entry for this announcement as received from `source`.
    ///
    /// The observed source IP replaces whatever address the sender claimed.
    pub fn into_peer(self, source: IpAddr, received: Instant) -> Peer {
        let mut peer = Peer::seen_at(self.id, source.to_string(), received);
        peer.connected = self.connected;
        peer
    }
}

/// Periodic announcer and passive listener for the discovery port
#[derive(Debug)]
pub struct DiscoveryBeacon {
    local_id: String,
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    interval: Duration,
    registry: Arc<PeerRegistry>,
}

impl DiscoveryBeacon {
    /// Bind the discovery socket.
    ///
    /// Announcements go to the configured broadcast address on the port that
    /// was actually bound, so binding port 0 in tests still talks to itself.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::Bind` if the socket cannot be bound or put in
    /// broadcast mode. Callers treat this as fatal.
    pub async fn bind(
        local_id: impl Into<String>,
        config: &NetworkConfig,
        registry: Arc<PeerRegistry>,
    ) -> Result<Self> {
        let bind_addr = config.discovery_bind_addr()?;
        let bind_error = |reason: String| NetworkError::Bind {
            address: bind_addr.to_string(),
            reason,
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| bind_error(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| bind_error(format!("set broadcast: {e}")))?;
        let local_addr = socket.local_addr().map_err(|e| bind_error(e.to_string()))?;

        let broadcast_ip = config.broadcast_ip()?;
        let broadcast_addr = SocketAddr::new(broadcast_ip, local_addr.port());
        log::info!("Discovery listening on {local_addr}, announcing to {broadcast_addr}");

        Ok(Self {
            local_id: local_id.into(),
            socket,
            broadcast_addr,
            interval: Duration::from_secs(config.announce_interval_secs.max(1)),
            registry,
        })
    }

    /// Address the discovery socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Broadcast a single announcement
    pub async fn announce_once(&self) -> Result<()> {
        let datagram = Announcement::new(self.local_id.as_str()).to_bytes()?;
        self.socket
            .send_to(&datagram, self.broadcast_addr)
            .await
            .map_err(|e| NetworkError::Send {
                peer: self.broadcast_addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Decode `datagram` and upsert the sender. Malformed input is dropped.
    pub async fn ingest(&self, datagram: &[u8], source: SocketAddr) -> bool {
        match Announcement::from_bytes(datagram) {
            Ok(announcement) => {
                let peer = announcement.into_peer(source.ip(), Instant::now());
                log::trace!("Announcement from {} at {}", peer.id, peer.address);
                self.registry.upsert(peer).await
            }
            Err(e) => {
                log::debug!("Dropping malformed announcement from {source}: {e}");
                false
            }
        }
    }

    /// Announce immediately, then once per interval, until shutdown.
    pub async fn run_announcer(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.announce_once().await {
                        log::debug!("Announcement failed: {e}");
                    }
                }
            }
        }
        log::debug!("Discovery announcer stopped");
    }

    /// Receive announcements until shutdown.
    pub async fn run_listener(self: Arc<Self>, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, source)) => {
                        self.ingest(&buf[..len], source).await;
                    }
                    Err(e) => log::debug!("Discovery receive error: {e}"),
                },
            }
        }
        log::debug!("Discovery listener stopped");
    }

    /// Spawn the announcer and listener tasks
    pub fn spawn(self, shutdown: &CancellationToken) -> [JoinHandle<()>; 2] {
        let beacon = Arc::new(self);
        [
            tokio::spawn(beacon.clone().run_announcer(shutdown.clone())),
            tokio::spawn(beacon.run_listener(shutdown.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            discovery_port: 0,
            broadcast_address: "127.0.0.1".to_string(),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_announcement_wire_format() {
        let announcement = Announcement::new("0a1b2c3d4e5f6071");
        let json: serde_json::Value =
            serde_json::from_slice(&announcement.to_bytes().unwrap()).unwrap();

        assert_eq!(json["ID"], "0a1b2c3d4e5f6071");
        assert_eq!(json["Connected"], true);
        assert!(json["LastSeen"].is_string());
    }

    #[test]
    fn test_announcement_accepts_foreign_timestamps() {
        let raw = br#"{"ID":"abc","Address":"","LastSeen":"2024-05-01T10:00:00.123456789+02:00","Connected":true}"#;
        let announcement = Announcement::from_bytes(raw).unwrap();
        assert_eq!(announcement.id, "abc");
        assert!(announcement.connected);
    }

    #[test]
    fn test_self_reported_address_is_ignored() {
        let mut announcement = Announcement::new("abc");
        announcement.address = "8.8.8.8".to_string();

        let peer = announcement.into_peer("192.168.1.20".parse().unwrap(), Instant::now());
        assert_eq!(peer.address, "192.168.1.20");
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_dropped() {
        let registry = Arc::new(PeerRegistry::new());
        let beacon = DiscoveryBeacon::bind("me", &loopback_config(), registry.clone())
            .await
            .unwrap();
        let source: SocketAddr = "10.0.0.5:35001".parse().unwrap();

        assert!(!beacon.ingest(b"not json", source).await);
        assert!(!beacon.ingest(br#"{"Address":"x"}"#, source).await);
        assert!(registry.is_empty().await);

        let valid = Announcement::new("peer-a").to_bytes().unwrap();
        assert!(beacon.ingest(&valid, source).await);
        assert_eq!(registry.snapshot().await[0].address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_udp_loopback_discovery() {
        let registry = Arc::new(PeerRegistry::new());
        let beacon = DiscoveryBeacon::bind("me", &loopback_config(), registry.clone())
            .await
            .unwrap();
        let beacon_addr = beacon.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handles = beacon.spawn(&shutdown);

        // A second node announcing from its own socket
        let other = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = Announcement::new("other").to_bytes().unwrap();
        other.send_to(&datagram, beacon_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.len().await < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let peers = registry.snapshot().await;
        let ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["me", "other"]);
        assert!(peers.iter().all(|p| p.address == "127.0.0.1"));

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = NetworkConfig {
            discovery_port: taken.local_addr().unwrap().port(),
            ..loopback_config()
        };
        let result = DiscoveryBeacon::bind("me", &config, Arc::new(PeerRegistry::new())).await;
        assert!(matches!(
            result,
            Err(crate::MessengerError::Network(NetworkError::Bind { .. }))
        ));
    }
}
