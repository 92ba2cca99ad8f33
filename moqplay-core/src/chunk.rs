//! Encoded media chunk types delivered by a subscription

use crate::error::PlayoutError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Media kind of a chunk or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

impl MediaType {
    /// Tag byte used in the chunk header
    pub fn tag(self) -> u8 {
        match self {
            MediaType::Video => 0,
            MediaType::Audio => 1,
        }
    }

    /// Parse a chunk header tag byte
    pub fn from_tag(tag: u8) -> Result<Self, PlayoutError> {
        match tag {
            0 => Ok(MediaType::Video),
            1 => Ok(MediaType::Audio),
            other => Err(PlayoutError::InvalidMediaType { tag: other }),
        }
    }

    /// Lowercase name, used in logs and track names
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of compressed media with its presentation timestamp.
///
/// Chunks are immutable once demultiplexed and are moved into the decode
/// pipeline, which consumes each of them exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    /// Media kind
    pub media_type: MediaType,
    /// Whether the chunk is independently decodable
    pub is_key: bool,
    /// Presentation timestamp in microseconds, track-local
    pub timestamp_us: i64,
    /// Chunk duration in microseconds (audio only)
    pub duration_us: Option<i64>,
    /// Compressed payload
    pub payload: Bytes,
}

impl EncodedChunk {
    /// Create a video chunk
    pub fn video(is_key: bool, timestamp_us: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            media_type: MediaType::Video,
            is_key,
            timestamp_us,
            duration_us: None,
            payload: payload.into(),
        }
    }

    /// Create an audio chunk. Audio chunks are always key chunks.
    pub fn audio(timestamp_us: i64, duration_us: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            media_type: MediaType::Audio,
            is_key: true,
            timestamp_us,
            duration_us: Some(duration_us),
            payload: payload.into(),
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
