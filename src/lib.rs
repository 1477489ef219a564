//! # LAN Messenger
//!
//! Ephemeral, encrypted peer-to-peer messaging on a local network with no
//! central server. Peers announce themselves by UDP broadcast, discover each
//! other opportunistically and exchange encrypted text and file payloads
//! directly.
//!
//! ## Features
//!
//! - **Zero configuration discovery**: periodic broadcast beacons on a fixed port
//! - **Encrypted transport**: ChaCha20-Poly1305 sealed envelopes over UDP
//! - **Liveness tracking**: peers are active while seen within a 10 second window
//! - **Bounded retries**: undeliverable messages are retried for about a minute
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lan_messenger::{Messenger, MessengerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (messenger, _events) = Messenger::new(MessengerConfig::default())?;
//!     messenger.start().await?;
//!     let outcome = messenger.send_text("hello").await?;
//!     println!("{outcome}");
//!     messenger.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security
//!
//! The symmetric key is generated locally and never exchanged. Two instances
//! can only read each other's messages when the operator distributes the same
//! key out of band (`crypto.shared_key`). This protects against casual
//! sniffing only; it does not authenticate peers.
//!
//! ## Architecture
//!
//! - [`crypto`]: symmetric envelope encryption
//! - [`network`]: peer registry and discovery beacon
//! - [`transport`]: message envelope, UDP delivery and the inbound listener
//! - [`delivery`]: retry queue for messages that reached no peer
//! - [`stats`]: traffic counters
//! - [`utils`]: configuration, errors and the file precheck

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod crypto;
pub mod delivery;
pub mod network;
pub mod stats;
pub mod transport;
pub mod utils;

pub use app::{AppEvent, Messenger, SendOutcome};
pub use crypto::SecureTransport;
pub use delivery::DeliveryQueue;
pub use network::{Peer, PeerRegistry};
pub use stats::StatsCollector;
pub use transport::{Message, MessageKind};
pub use utils::{MessengerConfig, MessengerError, Result};

/// Fixed protocol constants shared by every component.
pub mod defaults {
    use std::time::Duration;

    /// UDP port for discovery beacons
    pub const DISCOVERY_PORT: u16 = 35001;

    /// UDP port for encrypted message envelopes
    pub const MESSAGE_PORT: u16 = 35002;

    /// Destination for discovery beacons
    pub const BROADCAST_ADDRESS: &str = "255.255.255.255";

    /// How often a node announces itself
    pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

    /// A peer seen within this window counts as active. Every liveness
    /// query in the crate uses this value.
    pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

    /// Period of the delivery queue's retry cycle
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

    /// Minimum spacing between two attempts on the same queued message
    pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

    /// Failed attempts after which a queued message is dropped
    pub const MAX_DELIVERY_ATTEMPTS: u32 = 12;

    /// Read deadline for the message listener
    pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Largest file (and envelope) the messenger accepts: 6 GiB
    pub const MAX_FILE_SIZE: u64 = 6 * 1024 * 1024 * 1024;

    /// Available memory must exceed the file size by this factor
    pub const MEMORY_MARGIN: f64 = 1.5;

    /// Directory received files are written to
    pub const RECEIVED_DIR: &str = "received_files";
}
