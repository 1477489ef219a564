//! Inbound message handling.
//!
//! The listener owns the message port. Every datagram is decrypted, decoded,
//! counted and handed to the presentation layer as an [`AppEvent`]. Anything
//! that fails along the way is dropped without touching statistics.

use crate::app::AppEvent;
use crate::crypto::SecureTransport;
use crate::stats::{Direction, StatsCollector};
use crate::transport::{Message, MessageKind};
use crate::utils::{NetworkError, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receive buffer size; the largest datagram UDP can deliver
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Receives sealed envelopes on the message port
#[derive(Debug)]
pub struct MessageListener {
    socket: UdpSocket,
    transport: Arc<SecureTransport>,
    stats: Arc<StatsCollector>,
    received_dir: PathBuf,
    events: mpsc::UnboundedSender<AppEvent>,
    read_timeout: Duration,
}

impl MessageListener {
    /// Bind the message port.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::Bind` if the port is unavailable.
    pub async fn bind(
        bind_addr: SocketAddr,
        transport: Arc<SecureTransport>,
        stats: Arc<StatsCollector>,
        received_dir: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| NetworkError::Bind {
                address: bind_addr.to_string(),
                reason: e.to_string(),
            })?;
        log::info!("Message listener bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            transport,
            stats,
            received_dir: received_dir.into(),
            events,
            read_timeout: crate::defaults::READ_TIMEOUT,
        })
    }

    /// Override the read deadline used to poll for shutdown
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Address the message socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until shutdown. Reads wake at least once per read timeout.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = tokio::time::timeout(self.read_timeout, self.socket.recv_from(&mut buf)) => {
                    match result {
                        Err(_deadline) => continue,
                        Ok(Ok((len, source))) => {
                            self.handle_datagram(&buf[..len], source).await;
                        }
                        Ok(Err(e)) => log::debug!("Message receive error: {e}"),
                    }
                }
            }
        }
        log::debug!("Message listener stopped");
    }

    /// Process one datagram. Returns the message if it was accepted.
    pub async fn handle_datagram(&self, datagram: &[u8], source: SocketAddr) -> Option<Message> {
        let plaintext = match self.transport.decrypt(datagram) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::debug!("Dropping datagram from {source}: {e}");
                return None;
            }
        };
        let message = match Message::from_bytes(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropping undecodable envelope from {source}: {e}");
                return None;
            }
        };

        self.stats.record(&message, Direction::Received).await;
        if let Err(e) = self.dispatch(&message).await {
            log::warn!("Failed to handle {} from {}: {e}", message.kind, message.sender_id);
        }
        Some(message)
    }

    async fn dispatch(&self, message: &Message) -> Result<()> {
        let event = match message.kind {
            MessageKind::Text => AppEvent::TextReceived {
                sender_id: message.sender_id.clone(),
                content: message.content.clone(),
            },
            MessageKind::File => {
                let path = self.store_file(message).await?;
                AppEvent::FileReceived {
                    sender_id: message.sender_id.clone(),
                    path,
                }
            }
        };
        // A closed channel means nobody is presenting; the message still counts
        let _ = self.events.send(event);
        Ok(())
    }

    /// Write the payload to `<received_dir>/<sender>_<name>`, replacing any
    /// earlier file of the same name
    async fn store_file(&self, message: &Message) -> Result<PathBuf> {
        ensure_dir(&self.received_dir).await?;
        let path = self.received_dir.join(message.received_file_name());
        let data = message.data.as_deref().unwrap_or_default();
        tokio::fs::write(&path, data).await?;
        log::info!("Saved {} bytes from {} to {}", data.len(), message.sender_id, path.display());
        Ok(path)
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}
