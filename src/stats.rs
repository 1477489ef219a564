//! Traffic statistics.
//!
//! Counters only grow, saturating rather than wrapping. Every update goes
//! through [`StatsCollector::record`], which takes the write lock once per
//! message.

use crate::transport::{Message, MessageKind};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Which side of the wire a message was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We delivered it to at least one peer
    Sent,
    /// We decrypted and decoded it from a peer
    Received,
}

/// Raw counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Declared bytes of delivered messages
    pub bytes_sent: u64,
    /// Declared bytes of received messages
    pub bytes_received: u64,
    /// Text messages delivered
    pub messages_sent: u64,
    /// Text messages received
    pub messages_received: u64,
    /// Files delivered
    pub files_sent: u64,
    /// Files received
    pub files_received: u64,
}

/// Counters plus the uptime they were collected over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Counter values at snapshot time
    pub counters: Counters,
    /// Time since the collector was created
    pub uptime: Duration,
}

/// Shared statistics block
#[derive(Debug)]
pub struct StatsCollector {
    counters: RwLock<Counters>,
    started: Instant,
}

impl StatsCollector {
    /// Start collecting; uptime counts from now
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Account for one message. Bytes use the declared size.
    pub async fn record(&self, message: &Message, direction: Direction) {
        let mut counters = self.counters.write().await;
        match direction {
            Direction::Sent => {
                bump(&mut counters.bytes_sent, message.size);
                match message.kind {
                    MessageKind::File => bump(&mut counters.files_sent, 1),
                    MessageKind::Text => bump(&mut counters.messages_sent, 1),
                }
            }
            Direction::Received => {
                bump(&mut counters.bytes_received, message.size);
                match message.kind {
                    MessageKind::File => bump(&mut counters.files_received, 1),
                    MessageKind::Text => bump(&mut counters.messages_received, 1),
                }
            }
        }
    }

    /// Point-in-time copy of the counters
    pub async fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            counters: *self.counters.read().await,
            uptime: self.started.elapsed(),
        }
    }
}

/// Declared sizes come from remote peers; counters pin at `u64::MAX`
fn bump(counter: &mut u64, by: u64) {
    *counter = counter.saturating_add(by);
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "Statistics:")?;
        writeln!(f, "  Uptime: {}", format_uptime(self.uptime))?;
        writeln!(
            f,
            "  Messages: Sent={}, Received={}",
            c.messages_sent, c.messages_received
        )?;
        writeln!(f, "  Files: Sent={}, Received={}", c.files_sent, c.files_received)?;
        write!(
            f,
            "  Data: Sent={}, Received={}",
            format_bytes(c.bytes_sent),
            format_bytes(c.bytes_received)
        )
    }
}

/// Human-readable byte count using 1024 steps: `512 B`, `1.5 KB`, `2.0 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: &[u8] = b"KMGTPE";
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        PREFIXES[exp] as char
    )
}

/// Uptime rounded to whole seconds: `42s`, `3m5s`, `1h0m12s`
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs_f64().round() as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
