//! Pluggable wire codec for [`Message`] values.
//!
//! The bus never looks inside the payload; it only moves bytes between an
//! address and its subscribers. A codec turns a structured `Message` into
//! those bytes and back. Both ends of a connection must agree on the codec.

use std::sync::Arc;

use bytes::Bytes;

use crate::{Message, Result};

/// Serializes and deserializes [`Message`] values.
pub trait Codec: Send + Sync {
    // ---
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode a message into a bus payload.
    fn encode(&self, msg: &Message) -> Result<Bytes>;

    /// Decode a bus payload into a message.
    fn decode(&self, data: &[u8]) -> Result<Message>;
}

/// Shared codec pointer.
pub type CodecPtr = Arc<dyn Codec>;

/// Structural header+body encoding as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    // ---
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, msg: &Message) -> Result<Bytes> {
        // ---
        let bytes = serde_json::to_vec(msg)?;
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, data: &[u8]) -> Result<Message> {
        // ---
        Ok(serde_json::from_slice(data)?)
    }
}

/// The codec used when none is configured.
pub fn default_codec() -> CodecPtr {
    Arc::new(JsonCodec)
}
