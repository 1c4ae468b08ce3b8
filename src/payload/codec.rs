//! Event encoding for backends that store bytes.
//!
//! The canonical form is the JSON rendering of a [`StoredEvent`]; with
//! compression enabled it is wrapped in a zstd frame. Decoding tries the
//! configured form first and the other form second, so records written
//! before a compression toggle remain readable.

use crate::event::StoredEvent;

/// zstd level used when compression is enabled.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Errors from encoding or decoding an event.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("Failed to decode event: {primary}; alternate decoding also failed: {alternate}")]
    Decode { primary: String, alternate: String },
}

/// Serializes events, optionally compressing them.
#[derive(Debug, Clone, Copy)]
pub struct EventCodec {
    compression: bool,
    level: i32,
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(false)
    }
}

impl EventCodec {
    pub fn new(compression: bool) -> Self {
        Self {
            compression,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn serialize(&self, event: &StoredEvent) -> Result<Vec<u8>, CodecError> {
        let encoded = serde_json::to_vec(event)?;
        if !self.compression {
            return Ok(encoded);
        }
        zstd::encode_all(encoded.as_slice(), self.level).map_err(CodecError::Compression)
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<StoredEvent, CodecError> {
        let (primary, alternate): (Decoder, Decoder) = if self.compression {
            (decode_compressed, decode_plain)
        } else {
            (decode_plain, decode_compressed)
        };

        match primary(bytes) {
            Ok(event) => Ok(event),
            Err(primary_error) => alternate(bytes).map_err(|alternate_error| CodecError::Decode {
                primary: primary_error,
                alternate: alternate_error,
            }),
        }
    }
}

type Decoder = fn(&[u8]) -> Result<StoredEvent, String>;

fn decode_plain(bytes: &[u8]) -> Result<StoredEvent, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

fn decode_compressed(bytes: &[u8]) -> Result<StoredEvent, String> {
    let decompressed = zstd::decode_all(bytes).map_err(|e| format!("zstd decode: {}", e))?;
    decode_plain(&decompressed)
}
