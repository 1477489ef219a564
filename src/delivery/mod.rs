//! Deferred delivery.
//!
//! Messages that reached no peer when sent wait here for a bounded number
//! of retries.

pub mod queue;

pub use queue::*;
