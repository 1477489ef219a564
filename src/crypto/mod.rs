//! Cryptographic primitives.
//!
//! This module provides the symmetric envelope encryption used on the
//! message port. Discovery traffic is deliberately left unencrypted.

pub mod secure_transport;

pub use secure_transport::*;
