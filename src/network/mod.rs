//! Network layer for peer discovery and liveness.
//!
//! This module provides the peer registry and the broadcast beacon that
//! keeps it populated.

pub mod discovery;
pub mod registry;

pub use discovery::*;
pub use registry::*;
