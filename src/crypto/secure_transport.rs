//! Symmetric envelope encryption.
//!
//! Every sealed blob is `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! under ChaCha20-Poly1305. The key is generated once per process and never
//! leaves it unless the operator copies it to another instance by hand.

use crate::utils::{CryptoError, Result};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use std::fmt;

/// Size of the symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the per-message nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed blob adds on top of its plaintext
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts and decrypts message envelopes with a single in-memory key.
#[derive(Clone)]
pub struct SecureTransport {
    key: Key,
    cipher: ChaCha20Poly1305,
}

impl SecureTransport {
    /// Create a transport with a freshly generated random key
    pub fn generate() -> Self {
        Self::from_key(ChaCha20Poly1305::generate_key(&mut OsRng))
    }

    /// Create a transport from a raw 32-byte key
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` if the slice is not exactly 32 bytes
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey {
                reason: format!(
                    "Invalid key length: expected {}, got {}",
                    KEY_SIZE,
                    bytes.len()
                ),
            }
            .into());
        }
        Ok(Self::from_key(Key::clone_from_slice(bytes)))
    }

    /// Create a transport from a 64 character hex key, as distributed out of band
    pub fn from_key_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        Self::from_key_bytes(&bytes)
    }

    fn from_key(key: Key) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(&key),
            key,
        }
    }

    /// Hex encoding of the key, for sharing with another instance
    pub fn key_hex(&self) -> String {
        hex::encode(self.key.as_slice())
    }

    /// Seal `plaintext` under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encryption {
                reason: "Failed to encrypt envelope".to_string(),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a blob produced by [`SecureTransport::encrypt`]
    ///
    /// # Errors
    ///
    /// `MalformedCiphertext` when the input cannot even hold a nonce,
    /// `AuthenticationFailure` when the tag does not verify.
    pub fn decrypt(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::MalformedCiphertext { len: sealed.len() });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}

impl fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureTransport")
            .field("cipher", &"ChaCha20-Poly1305")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_roundtrip() {
        let transport = SecureTransport::generate();
        let plaintexts: [&[u8]; 4] = [b"", b"x", b"Hello, world!", &[0xffu8; 4096]];
        for plaintext in plaintexts {
            let sealed = transport.encrypt(plaintext).unwrap();
            assert_eq!(sealed.len(), plaintext.len() + SEAL_OVERHEAD);
            assert_eq!(transport.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let transport = SecureTransport::generate();
        let a = transport.encrypt(b"same").unwrap();
        let b = transport.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let transport = SecureTransport::generate();
        let sealed = transport.encrypt(b"tamper with me").unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut corrupted = sealed.clone();
                corrupted[byte] ^= 1 << bit;
                assert_eq!(
                    transport.decrypt(&corrupted),
                    Err(CryptoError::AuthenticationFailure),
                    "flip at byte {byte} bit {bit} was not detected"
                );
            }
        }
    }

    proptest! {
        #[test]
        fn test_any_plaintext_roundtrips(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
            let transport = SecureTransport::generate();
            let sealed = transport.encrypt(&plaintext).unwrap();
            prop_assert_eq!(sealed.len(), plaintext.len() + SEAL_OVERHEAD);
            prop_assert_eq!(transport.decrypt(&sealed).unwrap(), plaintext);
        }

        #[test]
        fn test_any_single_bit_flip_fails(
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let transport = SecureTransport::generate();
            let mut sealed = transport.encrypt(&plaintext).unwrap();
            let byte = position.index(sealed.len());
            sealed[byte] ^= 1 << bit;
            prop_assert_eq!(transport.decrypt(&sealed), Err(CryptoError::AuthenticationFailure));
        }
    }

    #[test]
    fn test_short_input_is_malformed() {
        let transport = SecureTransport::generate();
        assert_eq!(
            transport.decrypt(&[0u8; NONCE_SIZE - 1]),
            Err(CryptoError::MalformedCiphertext { len: NONCE_SIZE - 1 })
        );
        // A bare nonce is long enough to parse but carries no tag
        assert_eq!(
            transport.decrypt(&[0u8; NONCE_SIZE]),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        let ours = SecureTransport::generate();
        let theirs = SecureTransport::generate();
        let sealed = theirs.encrypt(b"not for you").unwrap();
        assert_eq!(ours.decrypt(&sealed), Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn test_shared_hex_key_interoperates() {
        let a = SecureTransport::generate();
        let b = SecureTransport::from_key_hex(&a.key_hex()).unwrap();
        let sealed = a.encrypt(b"out of band").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"out of band");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(SecureTransport::from_key_bytes(&[0u8; 16]).is_err());
        assert!(SecureTransport::from_key_hex("not hex").is_err());
        assert!(SecureTransport::from_key_hex(&"ab".repeat(31)).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let transport = SecureTransport::generate();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains(&transport.key_hex()));
    }
}
