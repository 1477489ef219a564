//! Retry queue for messages that reached no peer.
//!
//! A send that finds no live peer parks its message here. A background task
//! calls [`DeliveryQueue::retry_cycle`] every few seconds; each entry is
//! offered to every live peer until one accepts it or the entry runs out of
//! attempts.
//!
//! The whole scan runs under one mutex, so slow sends serialize behind it.
//! That is fine for a LAN with a handful of peers; indexing by entry id
//! would be the next step if the queue ever needs to scale.

use crate::defaults::{MAX_DELIVERY_ATTEMPTS, RETRY_BACKOFF};
use crate::network::Peer;
use crate::transport::{Deliver, Message, Outgoing};
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing and bound for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Minimum time between two attempts on the same entry
    pub backoff: Duration,
    /// Entries are dropped once this many attempts have failed
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: RETRY_BACKOFF,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
        }
    }
}

/// A message waiting for a live peer
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Entry identifier, for diagnostics
    pub id: Uuid,
    /// The message as originally sent, already serialized
    pub outgoing: Outgoing,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// When the entry was created or last attempted
    pub last_try: Instant,
}

/// Outcome of one pass over the queue
#[derive(Debug, Default)]
pub struct RetryReport {
    /// Messages that reached at least one peer, with the number reached
    pub delivered: Vec<(Message, usize)>,
    /// Entries dropped after their final failed attempt
    pub dropped: Vec<QueuedMessage>,
    /// Entries skipped because their backoff had not elapsed
    pub skipped: usize,
    /// Entries still queued after the pass
    pub remaining: usize,
}

/// Ordered list of undelivered messages behind a single lock
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: Mutex<Vec<QueuedMessage>>,
    policy: RetryPolicy,
}

impl DeliveryQueue {
    /// Queue with the default five second backoff and twelve attempts
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    /// Queue with a custom policy
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            policy,
        }
    }

    /// Append `outgoing` with no attempts recorded
    pub async fn enqueue(&self, outgoing: Outgoing) -> Uuid {
        self.enqueue_at(outgoing, Instant::now()).await
    }

    /// Append `outgoing` as if queued at `now`
    pub async fn enqueue_at(&self, outgoing: Outgoing, now: Instant) -> Uuid {
        let id = Uuid::new_v4();
        log::info!("Queued {} message {id} for retry", outgoing.message().kind);
        self.entries.lock().await.push(QueuedMessage {
            id,
            outgoing,
            attempts: 0,
            last_try: now,
        });
        id
    }

    /// Number of queued entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copy of the queued entries, oldest first
    pub async fn pending(&self) -> Vec<QueuedMessage> {
        self.entries.lock().await.clone()
    }

    /// One retry pass against `peers`, which the caller has already
    /// filtered to live peers other than itself
    pub async fn retry_cycle<D: Deliver>(&self, peers: &[Peer], deliverer: &D) -> RetryReport {
        self.retry_cycle_at(peers, deliverer, Instant::now()).await
    }

    /// One retry pass as of `now`
    pub async fn retry_cycle_at<D: Deliver>(
        &self,
        peers: &[Peer],
        deliverer: &D,
        now: Instant,
    ) -> RetryReport {
        let mut entries = self.entries.lock().await;
        let mut report = RetryReport::default();
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in std::mem::take(&mut *entries) {
            if now.saturating_duration_since(entry.last_try) < self.policy.backoff {
                report.skipped += 1;
                kept.push(entry);
                continue;
            }

            let reached = deliver_to_all(peers, &entry.outgoing, deliverer).await;
            if reached > 0 {
                log::info!(
                    "Delivered queued {} {} to {reached} peer(s) after {} failed attempt(s)",
                    entry.outgoing.message().kind,
                    entry.id,
                    entry.attempts
                );
                report.delivered.push((entry.outgoing.into_message(), reached));
                continue;
            }

            entry.attempts += 1;
            entry.last_try = now;
            if entry.attempts >= self.policy.max_attempts {
                log::warn!(
                    "Dropping {} message {} after {} failed attempts",
                    entry.outgoing.message().kind,
                    entry.id,
                    entry.attempts
                );
                report.dropped.push(entry);
            } else {
                kept.push(entry);
            }
        }

        report.remaining = kept.len();
        *entries = kept;
        report
    }
}

/// Offer `outgoing` to every peer concurrently; returns how many accepted
pub async fn deliver_to_all<D: Deliver>(peers: &[Peer], outgoing: &Outgoing, deliverer: &D) -> usize {
    let attempts: Vec<_> = peers
        .iter()
        .map(|peer| deliver_one(deliverer, peer, outgoing))
        .collect();
    join_all(attempts).await.into_iter().filter(|ok| *ok).count()
}

async fn deliver_one<D: Deliver>(deliverer: &D, peer: &Peer, outgoing: &Outgoing) -> bool {
    match deliverer.deliver(peer, outgoing).await {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Delivery to {} failed: {e}", peer.id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{NetworkError, Result};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Accepts delivery only for peers in `accepting`, counts calls and
    /// remembers where each payload buffer lived
    #[derive(Default)]
    struct FakeDeliverer {
        accepting: HashSet<String>,
        calls: AtomicUsize,
        buffers: StdMutex<HashSet<usize>>,
    }

    impl FakeDeliverer {
        fn accepting(ids: &[&str]) -> Self {
            Self {
                accepting: ids.iter().map(|id| id.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl Deliver for FakeDeliverer {
        async fn deliver(&self, peer: &Peer, outgoing: &Outgoing) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.buffers
                .lock()
                .unwrap()
                .insert(outgoing.plaintext().as_ptr() as usize);
            if self.accepting.contains(&peer.id) {
                Ok(())
            } else {
                Err(NetworkError::Send {
                    peer: peer.id.clone(),
                    reason: "refused".to_string(),
                }
                .into())
            }
        }
    }

    fn peers(ids: &[&str]) -> Vec<Peer> {
        ids.iter().map(|id| Peer::new(*id, "10.0.0.2")).collect()
    }

    fn text(body: &str) -> Outgoing {
        Outgoing::new(Message::text("a", body)).unwrap()
    }

    #[tokio::test]
    async fn test_every_peer_gets_the_same_serialization() {
        let deliverer = FakeDeliverer::accepting(&["b", "c", "d"]);
        let outgoing = text("fan out");
        let reached = deliver_to_all(&peers(&["b", "c", "d"]), &outgoing, &deliverer).await;

        assert_eq!(reached, 3);
        let buffers = deliverer.buffers.lock().unwrap();
        assert_eq!(*buffers, HashSet::from([outgoing.plaintext().as_ptr() as usize]));
    }

    #[tokio::test]
    async fn test_dropped_after_exactly_max_attempts() {
        let queue = DeliveryQueue::new();
        let deliverer = FakeDeliverer::default();
        let targets = peers(&["b"]);
        let t0 = Instant::now();
        queue.enqueue_at(text("hello"), t0).await;

        for cycle in 1..=11u64 {
            let report = queue
                .retry_cycle_at(&targets, &deliverer, t0 + RETRY_BACKOFF * cycle as u32)
                .await;
            assert!(report.dropped.is_empty(), "dropped early at cycle {cycle}");
            assert_eq!(queue.pending().await[0].attempts, cycle as u32);
        }

        let report = queue
            .retry_cycle_at(&targets, &deliverer, t0 + RETRY_BACKOFF * 12)
            .await;
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].attempts, MAX_DELIVERY_ATTEMPTS);
        assert!(queue.is_empty().await);

        // Never tried a thirteenth time
        queue
            .retry_cycle_at(&targets, &deliverer, t0 + RETRY_BACKOFF * 13)
            .await;
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_partial_success_removes_entry() {
        let queue = DeliveryQueue::new();
        let deliverer = FakeDeliverer::accepting(&["c"]);
        let t0 = Instant::now();
        queue.enqueue_at(text("hello"), t0).await;

        let report = queue
            .retry_cycle_at(&peers(&["b", "c", "d"]), &deliverer, t0 + RETRY_BACKOFF)
            .await;

        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.delivered[0].1, 1);
        assert_eq!(report.remaining, 0);
        assert!(queue.is_empty().await);
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_skips_recent_entries() {
        let queue = DeliveryQueue::new();
        let deliverer = FakeDeliverer::accepting(&["b"]);
        let t0 = Instant::now();
        queue.enqueue_at(text("hello"), t0).await;

        let report = queue
            .retry_cycle_at(&peers(&["b"]), &deliverer, t0 + Duration::from_millis(4999))
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending().await[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_no_peers_counts_as_failed_attempt() {
        let queue = DeliveryQueue::new();
        let deliverer = FakeDeliverer::default();
        let t0 = Instant::now();
        queue.enqueue_at(text("hello"), t0).await;

        let report = queue.retry_cycle_at(&[], &deliverer, t0 + RETRY_BACKOFF).await;
        assert_eq!(report.remaining, 1);
        let pending = queue.pending().await;
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_try, t0 + RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn test_entries_are_not_coalesced() {
        let queue = DeliveryQueue::new();
        queue.enqueue(text("same")).await;
        queue.enqueue(text("same")).await;
        assert_eq!(queue.len().await, 2);

        let pending = queue.pending().await;
        assert_ne!(pending[0].id, pending[1].id);
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let queue = DeliveryQueue::new();
        let deliverer = FakeDeliverer::default();
        let t0 = Instant::now();
        queue.enqueue_at(text("first"), t0).await;
        queue
            .enqueue_at(text("second"), t0 + Duration::from_secs(3))
            .await;
        queue
            .retry_cycle_at(&peers(&["b"]), &deliverer, t0 + RETRY_BACKOFF)
            .await;

        let contents: Vec<String> = queue
            .pending()
            .await
            .into_iter()
            .map(|entry| entry.outgoing.into_message().content)
            .collect();
        assert_eq!(contents, ["first", "second"]);
    }
}
