//! Transport layer for messaging.
//!
//! This module provides the message envelope, encrypted UDP delivery to
//! peers and the listener that receives envelopes on the message port.

pub mod listener;
pub mod protocol;
pub mod udp;

pub use listener::MessageListener;
pub use protocol::*;
pub use udp::*;
