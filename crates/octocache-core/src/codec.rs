//! Payload serialization boundary.
//!
//! The coordinator moves opaque byte payloads between tiers; this module is
//! the only place those bytes are produced or interpreted. MessagePack is
//! the default for its compact framing; JSON is available where payloads
//! must stay human-readable. Coordinator instances sharing a remote tier
//! must agree on the codec, since invalidation payloads cross nodes in the
//! same encoding.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Serialization failure at the codec boundary.
///
/// Carries the rendered source error only; the caller attaches key context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{0}")]
    Encode(String),
    #[error("{0}")]
    Decode(String),
}

/// Value codec used for both cached payloads and invalidation messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// MessagePack via rmp-serde. Compact, the default.
    #[default]
    MessagePack,
    /// JSON via serde_json.
    Json,
}

impl Codec {
    /// Serialize a value to bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::MessagePack => {
                rmp_serde::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
            Codec::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    /// Deserialize a value from bytes.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::MessagePack => {
                rmp_serde::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Codec::Json => {
                serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}
