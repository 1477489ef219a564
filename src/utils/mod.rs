//! Utility modules for configuration, error handling and the file precheck.

pub mod config;
pub mod errors;
pub mod precheck;

pub use config::*;
pub use errors::*;
pub use precheck::*;
