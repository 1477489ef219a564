//! Outbound delivery of sealed envelopes.
//!
//! [`Deliver`] is the seam between "who should get this message" (sends and
//! the retry queue) and "how it gets there". [`UdpDeliverer`] is the real
//! implementation: seal with [`SecureTransport`], one datagram per peer.
//! A message is serialized once into an [`Outgoing`] and only the sealing
//! is repeated per peer.

use crate::crypto::{SecureTransport, SEAL_OVERHEAD};
use crate::network::Peer;
use crate::transport::Message;
use crate::utils::{NetworkError, ProtocolError, Result};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A message serialized once, ready to be sealed for any number of peers
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    message: Message,
    plaintext: Vec<u8>,
}

impl Outgoing {
    /// Serialize `message`, rejecting envelopes no datagram can carry
    pub fn new(message: Message) -> Result<Self> {
        let plaintext = message.to_bytes()?;
        check_datagram_size(plaintext.len())?;
        Ok(Self { message, plaintext })
    }

    /// The message as sent
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Serialized envelope, before sealing
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// Give back the message, discarding the serialized form
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Delivers one message to one peer
pub trait Deliver: Send + Sync {
    /// Attempt delivery. An `Err` only means this peer was not reached.
    fn deliver(&self, peer: &Peer, outgoing: &Outgoing) -> impl Future<Output = Result<()>> + Send;
}

/// Sends sealed envelopes to `<peer address>:<message port>`
#[derive(Debug, Clone)]
pub struct UdpDeliverer {
    transport: Arc<SecureTransport>,
    port: u16,
}

impl UdpDeliverer {
    /// Deliver to the given message port on every peer
    pub fn new(transport: Arc<SecureTransport>, port: u16) -> Self {
        Self { transport, port }
    }

    /// Seal `outgoing` under a fresh nonce
    pub fn seal(&self, outgoing: &Outgoing) -> Result<Vec<u8>> {
        self.transport.encrypt(outgoing.plaintext())
    }

    fn peer_addr(&self, peer: &Peer) -> Result<SocketAddr> {
        let ip: IpAddr = peer
            .address
            .parse()
            .map_err(|_| NetworkError::InvalidAddress {
                address: peer.address.clone(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Fail with `MessageTooLarge` when a plaintext of `len` bytes would not
/// fit in one datagram once sealed
pub fn check_datagram_size(len: usize) -> Result<()> {
    let sealed = len + SEAL_OVERHEAD;
    if sealed > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: sealed as u64,
            max: MAX_DATAGRAM_SIZE as u64,
        }
        .into());
    }
    Ok(())
}

impl Deliver for UdpDeliverer {
    async fn deliver(&self, peer: &Peer, outgoing: &Outgoing) -> Result<()> {
        let addr = self.peer_addr(peer)?;
        let sealed = self.seal(outgoing)?;

        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let send_error = |e: std::io::Error| NetworkError::Send {
            peer: format!("{} ({addr})", peer.id),
            reason: e.to_string(),
        };

        let socket = UdpSocket::bind(local).await.map_err(send_error)?;
        socket.send_to(&sealed, addr).await.map_err(send_error)?;
        log::trace!("Sent {} bytes to {} at {addr}", sealed.len(), peer.id);
        Ok(())
    }
}
