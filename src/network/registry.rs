//! Concurrent store of known peers with liveness windowing.
//!
//! Peers are never evicted. Whether a peer is active is derived at query time
//! from its last-seen instant and [`LIVENESS_WINDOW`].

use crate::defaults::LIVENESS_WINDOW;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A remote messenger instance as last observed on the discovery port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Opaque identity token chosen by the peer
    pub id: String,
    /// Source IP of the peer's last announcement
    pub address: String,
    /// Monotonic receipt time of the last announcement
    pub last_seen: Instant,
    /// Wall-clock receipt time, for display
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    /// Informational flag copied from the announcement
    pub connected: bool,
}

impl Peer {
    /// Create a peer entry stamped with the current time
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self::seen_at(id, address, Instant::now())
    }

    /// Create a peer entry stamped with `last_seen`
    pub fn seen_at(id: impl Into<String>, address: impl Into<String>, last_seen: Instant) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_seen,
            last_seen_at: wall_clock(last_seen),
            connected: true,
        }
    }

    /// Whether the peer was seen within the liveness window ending at `now`
    pub fn is_active_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) < LIVENESS_WINDOW
    }
}

/// Wall-clock time of the monotonic `instant`, offset from the present
fn wall_clock(instant: Instant) -> chrono::DateTime<chrono::Utc> {
    let now = Instant::now();
    let wall = chrono::Utc::now();
    let delta = |d| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
    if instant <= now {
        wall.checked_sub_signed(delta(now.saturating_duration_since(instant)))
            .unwrap_or(wall)
    } else {
        wall.checked_add_signed(delta(instant.saturating_duration_since(now)))
            .unwrap_or(wall)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - Last seen: {}",
            self.id,
            self.address,
            self.last_seen_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
        )
    }
}

/// Peers keyed by identity behind a read/write lock.
///
/// The map never leaves this type; callers get clones.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<BTreeMap<String, Peer>>,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the entry for `peer.id`.
    ///
    /// Returns false when the stored entry is newer than `peer`, in which
    /// case nothing changes and last-seen never moves backwards.
    pub async fn upsert(&self, peer: Peer) -> bool {
        let mut peers = self.peers.write().await;
        if let Some(existing) = peers.get(&peer.id) {
            if existing.last_seen > peer.last_seen {
                return false;
            }
        }
        peers.insert(peer.id.clone(), peer);
        true
    }

    /// All known peers ordered by identity
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Number of known peers, active or not
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer has ever been seen
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Number of peers seen within the liveness window
    pub async fn count_active(&self) -> usize {
        self.count_active_at(Instant::now()).await
    }

    /// Number of peers seen within the liveness window ending at `now`
    pub async fn count_active_at(&self, now: Instant) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.is_active_at(now))
            .count()
    }

    /// Active peers other than `exclude`, ordered by identity
    pub async fn active_peers(&self, exclude: &str) -> Vec<Peer> {
        self.active_peers_at(exclude, Instant::now()).await
    }

    /// Active peers other than `exclude` as of `now`
    pub async fn active_peers_at(&self, exclude: &str, now: Instant) -> Vec<Peer> {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.id != exclude && peer.is_active_at(now))
            .cloned()
            .collect()
    }

    /// Drop every entry. Only used on teardown.
    pub async fn clear(&self) {
        self.peers.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_liveness_window() {
        let registry = PeerRegistry::new();
        let t0 = Instant::now();
        registry.upsert(Peer::seen_at("a1", "10.0.0.2", t0)).await;

        assert_eq!(registry.count_active_at(t0 + Duration::from_secs(9)).await, 1);
        assert_eq!(registry.count_active_at(t0 + Duration::from_secs(11)).await, 0);
        // Stale peers stay known
        assert_eq!(registry.len().await, 1);
    }

    #[test]
    fn test_display_time_tracks_last_seen() {
        let now = Instant::now();
        let later = Peer::seen_at("b", "10.0.0.2", now + Duration::from_secs(90));
        let ahead = (later.last_seen_at - chrono::Utc::now()).num_seconds();
        assert!((88..=90).contains(&ahead), "ahead by {ahead}s");

        if let Some(earlier) = now.checked_sub(Duration::from_secs(90)) {
            let peer = Peer::seen_at("c", "10.0.0.3", earlier);
            let behind = (chrono::Utc::now() - peer.last_seen_at).num_seconds();
            assert!((90..=92).contains(&behind), "behind by {behind}s");
        }

        let fresh = Peer::new("d", "10.0.0.4");
        assert!((chrono::Utc::now() - fresh.last_seen_at).num_seconds() <= 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_entry() {
        let registry = PeerRegistry::new();
        let t0 = Instant::now();
        registry.upsert(Peer::seen_at("a1", "10.0.0.2", t0)).await;

        let mut moved = Peer::seen_at("a1", "10.0.0.7", t0 + Duration::from_secs(3));
        moved.connected = false;
        assert!(registry.upsert(moved.clone()).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot, vec![moved]);
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_backwards() {
        let registry = PeerRegistry::new();
        let t0 = Instant::now();
        registry
            .upsert(Peer::seen_at("a1", "10.0.0.2", t0 + Duration::from_secs(5)))
            .await;

        assert!(!registry.upsert(Peer::seen_at("a1", "10.0.0.9", t0)).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].address, "10.0.0.2");
        assert_eq!(snapshot[0].last_seen, t0 + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let registry = PeerRegistry::new();
        for id in ["c3", "a1", "b2"] {
            registry.upsert(Peer::new(id, "10.0.0.2")).await;
        }
        let ids: Vec<String> = registry.snapshot().await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["a1", "b2", "c3"]);
    }

    #[tokio::test]
    async fn test_active_peers_excludes_self_and_stale() {
        let registry = PeerRegistry::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(30);
        registry.upsert(Peer::seen_at("old", "10.0.0.3", t0)).await;
        registry.upsert(Peer::seen_at("me", "10.0.0.1", t1)).await;
        registry.upsert(Peer::seen_at("live", "10.0.0.2", t1)).await;

        let active = registry.active_peers_at("me", t1 + Duration::from_secs(1)).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "live");
    }

    #[tokio::test]
    async fn test_concurrent_upserts() {
        let registry = Arc::new(PeerRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.upsert(Peer::new(format!("{i:02}"), "10.0.0.2")).await;
                registry.count_active().await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.count_active().await, 32);
    }

    #[test]
    fn test_clear() {
        tokio_test::block_on(async {
            let registry = PeerRegistry::new();
            registry.upsert(Peer::new("a1", "10.0.0.2")).await;
            registry.clear().await;
            assert!(registry.is_empty().await);
        });
    }
}
