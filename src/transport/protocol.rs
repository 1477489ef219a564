//! Message envelope definitions and serialization.
//!
//! The envelope is JSON before encryption. Field names and the base64
//! encoding of `data` match the format existing peers emit.

use crate::defaults::MAX_FILE_SIZE;
use crate::utils::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text; `content` is the body
    Text,
    /// A file; `content` is the file name and `data` its bytes
    File,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::File => f.write_str("file"),
        }
    }
}

/// The plaintext envelope exchanged on the message port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text body, or file name for file messages
    pub content: String,
    /// Raw file bytes
    #[serde(default, with = "base64_bytes")]
    pub data: Option<Vec<u8>>,
    /// Creation time on the sender
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Identity of the sending instance
    pub sender_id: String,
    /// Declared payload size in bytes.
    ///
    /// Not re-validated on receipt; only statistics read it.
    pub size: u64,
}

impl Message {
    /// Create a text message; size is the body length in bytes
    pub fn text(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        let content = body.into();
        Self {
            kind: MessageKind::Text,
            size: content.len() as u64,
            content,
            data: None,
            timestamp: chrono::Utc::now(),
            sender_id: sender_id.into(),
        }
    }

    /// Create a file message; size is the payload length in bytes
    pub fn file(sender_id: impl Into<String>, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::File,
            content: name.into(),
            size: data.len() as u64,
            data: Some(data),
            timestamp: chrono::Utc::now(),
            sender_id: sender_id.into(),
        }
    }

    /// Name a received file should be stored under: `<sender>_<basename>`.
    ///
    /// Only the final path component of `content` is kept, so a hostile
    /// name cannot escape the received files directory.
    pub fn received_file_name(&self) -> String {
        let base = Path::new(&self.content)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("unnamed");
        let sender: String = self
            .sender_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        format!("{sender}_{base}")
    }

    /// Serialize the envelope, enforcing the payload ceiling
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = self.data.as_ref().map_or(0, Vec::len) as u64;
        if payload > MAX_FILE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload,
                max: MAX_FILE_SIZE,
            }
            .into());
        }

        let serialized = serde_json::to_vec(self)?;
        if serialized.len() as u64 > MAX_FILE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: serialized.len() as u64,
                max: MAX_FILE_SIZE,
            }
            .into());
        }
        Ok(serialized)
    }

    /// Deserialize an envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ProtocolError::InvalidMessage {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// `Option<Vec<u8>>` as a base64 string, or `null`
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
