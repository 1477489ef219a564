//! Error types and handling for the LAN messenger.
//!
//! Inbound packet failures are dropped at the listener and never reach a
//! caller; these types describe what a caller can actually observe: startup
//! failures, precondition failures on a send, and configuration problems.

use thiserror::Error;

/// Result type alias for the messenger library
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Top-level error type for all messenger operations
#[derive(Error, Debug, Clone)]
pub enum MessengerError {
    /// Encryption and decryption errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Socket and addressing errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Envelope encoding errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File send preconditions that were not met
    #[error("Precheck failed: {0}")]
    Precheck(#[from] PrecheckError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The instance was shut down and cannot be started again
    #[error("Messenger has been shut down")]
    ShutDown,
}

/// Envelope encryption errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input is shorter than the nonce that must prefix it
    #[error("Malformed ciphertext: {len} bytes is shorter than the nonce")]
    MalformedCiphertext { len: usize },

    /// AEAD tag check failed: wrong key, corrupted or foreign data
    #[error("Authentication failure")]
    AuthenticationFailure,

    /// Encryption operation failure
    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    /// Invalid key format or size
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },
}

/// Socket and addressing errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// A listening socket could not be bound
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// A datagram could not be sent to a peer
    #[error("Send to {peer} failed: {reason}")]
    Send { peer: String, reason: String },

    /// Peer address could not be parsed
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },
}

/// Envelope encoding errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Envelope could not be decoded
    #[error("Invalid message format: {reason}")]
    InvalidMessage { reason: String },

    /// Envelope exceeds a size ceiling
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: u64 },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Directory creation failure
    #[error("Failed to create directory: {path}")]
    DirectoryCreation { path: String },
}

/// Reasons a file may not be sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrecheckError {
    /// File is missing or unreadable
    #[error("Unable to stat {path}: {reason}")]
    FileUnavailable { path: String, reason: String },

    /// File exceeds the size ceiling
    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    /// Not enough free memory to load and encrypt the file
    #[error("Insufficient memory: need {required} bytes, have {available} bytes available")]
    InsufficientMemory { required: u64, available: u64 },

    /// Available memory could not be determined
    #[error("Unable to check memory: {reason}")]
    MemoryProbe { reason: String },
}

impl MessengerError {
    /// Returns true if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(NetworkError::Send { .. })
                | Self::Precheck(PrecheckError::InsufficientMemory { .. })
        )
    }

    /// Returns true if this error means an inbound packet should be dropped
    pub fn is_dropped_packet(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::MalformedCiphertext { .. })
                | Self::Crypto(CryptoError::AuthenticationFailure)
                | Self::Protocol(ProtocolError::InvalidMessage { .. })
        )
    }
}

impl From<std::io::Error> for MessengerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MessengerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MessengerError::Crypto(CryptoError::InvalidKey {
            reason: "Invalid key length".to_string(),
        });
        assert!(error.to_string().contains("Invalid key"));

        let error = MessengerError::from(PrecheckError::FileTooLarge { size: 10, max: 5 });
        assert_eq!(
            error.to_string(),
            "Precheck failed: File too large: 10 bytes (max: 5)"
        );
    }

    #[test]
    fn test_error_recovery() {
        let send_error = MessengerError::Network(NetworkError::Send {
            peer: "abcd".to_string(),
            reason: "unreachable".to_string(),
        });
        assert!(send_error.is_recoverable());

        let crypto_error = MessengerError::Crypto(CryptoError::AuthenticationFailure);
        assert!(!crypto_error.is_recoverable());
        assert!(!MessengerError::ShutDown.is_recoverable());
    }

    #[test]
    fn test_dropped_packets() {
        assert!(MessengerError::from(CryptoError::AuthenticationFailure).is_dropped_packet());
        assert!(MessengerError::from(CryptoError::MalformedCiphertext { len: 3 }).is_dropped_packet());
        assert!(!MessengerError::Io("disk full".to_string()).is_dropped_packet());
    }
}
