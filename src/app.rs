//! Main application lifecycle and coordination.
//!
//! [`Messenger`] owns every shared component, starts the background tasks
//! and exposes the operations the presentation layer drives: sending,
//! network status, statistics and shutdown. Inbound traffic reaches the
//! presentation layer as [`AppEvent`]s.

use crate::{
    crypto::SecureTransport,
    defaults::RETRY_INTERVAL,
    delivery::{deliver_to_all, DeliveryQueue},
    network::{DiscoveryBeacon, Peer, PeerRegistry},
    stats::{Direction, StatsCollector, StatsSnapshot},
    transport::{Message, MessageKind, MessageListener, Outgoing, UdpDeliverer},
    utils::{precheck_file, MemoryProbe, MessengerConfig, MessengerError, Result},
};
use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A text message arrived
    TextReceived {
        /// Identity of the sender
        sender_id: String,
        /// Message body
        content: String,
    },
    /// A file arrived and was written to `path`
    FileReceived {
        /// Identity of the sender
        sender_id: String,
        /// Where the payload was stored
        path: PathBuf,
    },
    /// A queued message finally reached at least one peer
    QueuedDelivered {
        /// Text or file
        kind: MessageKind,
        /// Peers reached on the successful attempt
        peers: usize,
    },
    /// A queued message ran out of attempts
    QueuedDropped {
        /// Text or file
        kind: MessageKind,
        /// Failed attempts made before giving up
        attempts: u32,
    },
}

/// Result of a user-initiated send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Reached this many live peers
    Delivered {
        /// Number of peers that accepted the datagram
        peers: usize,
    },
    /// No live peer accepted it; parked in the delivery queue
    Queued,
}

impl SendOutcome {
    /// Peers reached by the immediate attempt
    pub fn peers_reached(&self) -> usize {
        match self {
            Self::Delivered { peers } => *peers,
            Self::Queued => 0,
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { peers } => write!(f, "Message sent to {peers} peer(s)"),
            Self::Queued => f.write_str("No active peers reached; message queued for retry"),
        }
    }
}

/// Addresses bound by [`Messenger::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    /// Discovery socket
    pub discovery: SocketAddr,
    /// Message socket
    pub message: SocketAddr,
}

struct Running {
    addrs: BoundAddrs,
    tasks: Vec<JoinHandle<()>>,
}

/// A messenger instance: one identity, one key, one set of sockets
pub struct Messenger {
    id: String,
    config: MessengerConfig,
    registry: Arc<PeerRegistry>,
    transport: Arc<SecureTransport>,
    stats: Arc<StatsCollector>,
    queue: Arc<DeliveryQueue>,
    deliverer: Arc<UdpDeliverer>,
    events: mpsc::UnboundedSender<AppEvent>,
    shutdown: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl Messenger {
    /// Create an instance with a fresh identity. Nothing is bound until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Fails if the configured shared key is malformed.
    pub fn new(config: MessengerConfig) -> Result<(Self, mpsc::UnboundedReceiver<AppEvent>)> {
        let transport = Arc::new(config.crypto.build_transport()?);
        let (events, receiver) = mpsc::unbounded_channel();
        let deliverer = Arc::new(UdpDeliverer::new(
            transport.clone(),
            config.network.message_port,
        ));

        let messenger = Self {
            id: generate_id(),
            config,
            registry: Arc::new(PeerRegistry::new()),
            transport,
            stats: Arc::new(StatsCollector::new()),
            queue: Arc::new(DeliveryQueue::new()),
            deliverer,
            events,
            shutdown: CancellationToken::new(),
            running: Mutex::new(None),
        };
        log::info!("Created messenger {}", messenger.id);
        Ok((messenger, receiver))
    }

    /// Bind both ports and spawn the background tasks.
    ///
    /// # Errors
    ///
    /// A port that cannot be bound is fatal; nothing is left running.
    /// Fails with [`MessengerError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<BoundAddrs> {
        let mut running = self.running.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(MessengerError::ShutDown);
        }
        if let Some(running) = running.as_ref() {
            log::warn!("Messenger {} already started", self.id);
            return Ok(running.addrs);
        }

        let network = &self.config.network;
        let beacon = DiscoveryBeacon::bind(self.id.as_str(), network, self.registry.clone()).await?;
        let listener = MessageListener::bind(
            network.message_bind_addr()?,
            self.transport.clone(),
            self.stats.clone(),
            self.config.storage.received_dir.clone(),
            self.events.clone(),
        )
        .await?;
        let addrs = BoundAddrs {
            discovery: beacon.local_addr()?,
            message: listener.local_addr()?,
        };

        let mut tasks = Vec::with_capacity(4);
        tasks.extend(beacon.spawn(&self.shutdown));
        tasks.push(tokio::spawn(listener.run(self.shutdown.clone())));
        tasks.push(tokio::spawn(
            self.retry_task().run(RETRY_INTERVAL, self.shutdown.clone()),
        ));

        log::info!(
            "Messenger {} started (discovery {}, messages {})",
            self.id,
            addrs.discovery,
            addrs.message
        );
        *running = Some(Running { addrs, tasks });
        Ok(addrs)
    }

    /// Send a text message to every live peer
    pub async fn send_text(&self, body: &str) -> Result<SendOutcome> {
        self.send_message(Message::text(self.id.as_str(), body)).await
    }

    /// Precheck, read and send a file to every live peer
    pub async fn send_file(&self, path: &Path, probe: &impl MemoryProbe) -> Result<SendOutcome> {
        precheck_file(path, probe)?;
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.send_message(Message::file(self.id.as_str(), name, data))
            .await
    }

    /// Deliver `message` to all live peers, or queue it when none is reached
    pub async fn send_message(&self, message: Message) -> Result<SendOutcome> {
        let outgoing = Outgoing::new(message)?;

        let peers = self.registry.active_peers(&self.id).await;
        let reached = deliver_to_all(&peers, &outgoing, self.deliverer.as_ref()).await;
        if reached > 0 {
            self.stats.record(outgoing.message(), Direction::Sent).await;
            return Ok(SendOutcome::Delivered { peers: reached });
        }

        log::debug!(
            "{} message reached none of {} live peer(s)",
            outgoing.message().kind,
            peers.len()
        );
        self.queue.enqueue(outgoing).await;
        Ok(SendOutcome::Queued)
    }

    /// `Network Status: N peers (M active)`
    pub async fn network_status(&self) -> String {
        format!(
            "Network Status: {} peers ({} active)",
            self.registry.len().await,
            self.registry.count_active().await
        )
    }

    /// Current traffic statistics
    pub async fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot().await
    }

    /// Every known peer, ordered by identity
    pub async fn peers(&self) -> Vec<Peer> {
        self.registry.snapshot().await
    }

    /// The shared peer registry. Discovery keeps it populated; embedders may
    /// seed peers learned some other way.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Messages still waiting for a live peer
    pub async fn queued(&self) -> usize {
        self.queue.len().await
    }

    /// This instance's identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hex encoding of the session key, for sharing out of band
    pub fn key_hex(&self) -> String {
        self.transport.key_hex()
    }

    /// The configuration this instance was created with
    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Stop all background tasks and forget known peers
    pub async fn shutdown(&self) {
        log::info!("Shutting down messenger {}", self.id);
        self.shutdown.cancel();
        if let Some(running) = self.running.lock().await.take() {
            for task in running.tasks {
                if let Err(e) = task.await {
                    log::warn!("Background task ended abnormally: {e}");
                }
            }
        }
        self.registry.clear().await;
    }

    fn retry_task(&self) -> RetryTask {
        RetryTask {
            local_id: self.id.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            deliverer: self.deliverer.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
        }
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Background retry of queued messages.
///
/// Peers are snapshotted before the queue lock is taken and statistics are
/// recorded after it is released.
struct RetryTask {
    local_id: String,
    registry: Arc<PeerRegistry>,
    queue: Arc<DeliveryQueue>,
    deliverer: Arc<UdpDeliverer>,
    stats: Arc<StatsCollector>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl RetryTask {
    async fn run(self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.cycle_at(Instant::now()).await,
            }
        }
        log::debug!("Retry task stopped");
    }

    async fn cycle_at(&self, now: Instant) {
        if self.queue.is_empty().await {
            return;
        }
        let peers = self.registry.active_peers_at(&self.local_id, now).await;
        let report = self
            .queue
            .retry_cycle_at(&peers, self.deliverer.as_ref(), now)
            .await;

        // A closed channel means nobody is presenting; the queue still drains
        for (message, peers) in report.delivered {
            self.stats.record(&message, Direction::Sent).await;
            let _ = self.events.send(AppEvent::QueuedDelivered {
                kind: message.kind,
                peers,
            });
        }
        for entry in report.dropped {
            let _ = self.events.send(AppEvent::QueuedDropped {
                kind: entry.outgoing.message().kind,
                attempts: entry.attempts,
            });
        }
    }
}

/// 8 random bytes, hex encoded
fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
