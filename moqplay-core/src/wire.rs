//! Chunk wire format and stream demultiplexer
//!
//! A subscription delivers an unframed byte stream; receive events carry no
//! guarantee of alignment with chunk boundaries. Each chunk on the stream is
//! therefore prefixed with its body length as a QUIC variable-length integer
//! (RFC 9000, Section 16), followed by the body:
//!
//! ```text
//! [varint body length]
//! [1 byte media type][1 byte key flag][8 bytes timestamp, f64 LE, µs]
//! [8 bytes duration, f64 LE, µs, audio only][payload...]
//! ```

use crate::chunk::{EncodedChunk, MediaType};
use crate::error::PlayoutError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Size of the fixed chunk header shared by all media types
pub const CHUNK_HEADER_LEN: usize = 1 + 1 + 8;

/// Size of the audio duration field
pub const DURATION_LEN: usize = 8;

/// Largest value a QUIC varint can carry
pub const MAX_VARINT: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Default demultiplexer limit on a single chunk body
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Chunk wire format encoder/decoder
#[derive(Debug)]
pub struct ChunkWireFormat;

/// Variable-length integer encoding following QUIC specification (RFC 9000, Section 16)
impl ChunkWireFormat {
    /// Encode a variable-length integer
    pub fn encode_varint(value: u64, buf: &mut BytesMut) -> Result<(), PlayoutError> {
        if value < 0x40 {
            buf.put_u8(value as u8);
        } else if value < 0x4000 {
            buf.put_u16((0x4000 | value) as u16);
        } else if value < 0x4000_0000 {
            buf.put_u32((0x8000_0000 | value) as u32);
        } else if value <= MAX_VARINT {
            buf.put_u64(0xC000_0000_0000_0000 | value);
        } else {
            return Err(PlayoutError::InvalidData {
                reason: format!("Value too large for varint encoding: {}", value),
            });
        }
        Ok(())
    }

    /// Number of bytes a value occupies as a varint
    pub fn varint_size(value: u64) -> usize {
        if value < 0x40 {
            1
        } else if value < 0x4000 {
            2
        } else if value < 0x4000_0000 {
            4
        } else {
            8
        }
    }

    /// Decode a varint from the front of `data` without consuming it.
    ///
    /// Returns `None` when more bytes are needed, otherwise the value and
    /// the number of bytes it occupies.
    pub fn peek_varint(data: &[u8]) -> Option<(u64, usize)> {
        let first_byte = *data.first()?;
        let length = 1usize << (first_byte >> 6);
        if data.len() < length {
            return None;
        }

        let mut value = (first_byte & 0x3F) as u64;
        for byte in &data[1..length] {
            value = (value << 8) | *byte as u64;
        }
        Some((value, length))
    }
}

/// Chunk body encoding and decoding
impl ChunkWireFormat {
    /// Encoded body length of a chunk, excluding the length prefix
    pub fn body_len(chunk: &EncodedChunk) -> usize {
        let duration = match chunk.media_type {
            MediaType::Audio => DURATION_LEN,
            MediaType::Video => 0,
        };
        CHUNK_HEADER_LEN + duration + chunk.payload.len()
    }

    /// Encode a chunk body (no length prefix)
    pub fn encode_chunk(chunk: &EncodedChunk, buf: &mut BytesMut) {
        buf.reserve(Self::body_len(chunk));
        buf.put_u8(chunk.media_type.tag());
        buf.put_u8(u8::from(chunk.is_key));
        buf.put_f64_le(chunk.timestamp_us as f64);
        if chunk.media_type == MediaType::Audio {
            buf.put_f64_le(chunk.duration_us.unwrap_or(0) as f64);
        }
        buf.extend_from_slice(&chunk.payload);
    }

    /// Encode a chunk with its varint length prefix, ready for a byte stream
    pub fn encode_framed(chunk: &EncodedChunk, buf: &mut BytesMut) -> Result<(), PlayoutError> {
        Self::encode_varint(Self::body_len(chunk) as u64, buf)?;
        Self::encode_chunk(chunk, buf);
        Ok(())
    }

    /// Decode a complete chunk body
    pub fn decode_chunk(mut body: Bytes) -> Result<EncodedChunk, PlayoutError> {
        if body.len() < CHUNK_HEADER_LEN {
            return Err(PlayoutError::InvalidData {
                reason: format!(
                    "Chunk header truncated: need {} bytes, have {}",
                    CHUNK_HEADER_LEN,
                    body.len()
                ),
            });
        }

        let media_type = MediaType::from_tag(body.get_u8())?;
        let is_key = match body.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(PlayoutError::InvalidData {
                    reason: format!("Invalid key flag: {}", other),
                })
            }
        };
        let timestamp_us = Self::decode_time(body.get_f64_le(), "timestamp")?;

        let duration_us = match media_type {
            MediaType::Audio => {
                if body.remaining() < DURATION_LEN {
                    return Err(PlayoutError::InvalidData {
                        reason: "Audio chunk is missing its duration".to_string(),
                    });
                }
                Some(Self::decode_time(body.get_f64_le(), "duration")?)
            }
            MediaType::Video => None,
        };

        Ok(EncodedChunk {
            media_type,
            is_key,
            timestamp_us,
            duration_us,
            payload: body,
        })
    }

    fn decode_time(value: f64, field: &str) -> Result<i64, PlayoutError> {
        if !value.is_finite() || value.abs() > i64::MAX as f64 {
            return Err(PlayoutError::InvalidData {
                reason: format!("Chunk {} is not representable: {}", field, value),
            });
        }
        Ok(value.round() as i64)
    }
}

/// Reassembles framed chunks from arbitrarily split receive events.
///
/// One demultiplexer belongs to exactly one subscription's byte stream.
#[derive(Debug)]
pub struct ChunkDemuxer {
    buffer: BytesMut,
    max_chunk_size: usize,
    chunks_decoded: u64,
    chunks_rejected: u64,
}

impl ChunkDemuxer {
    /// Create a demultiplexer with the default chunk size limit
    pub fn new() -> Self {
        Self::with_max_chunk_size(DEFAULT_MAX_CHUNK_SIZE)
    }

    /// Create a demultiplexer with a custom chunk size limit
    pub fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_chunk_size,
            chunks_decoded: 0,
            chunks_rejected: 0,
        }
    }

    /// Append bytes from one receive event
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete chunk.
    ///
    /// `Ok(None)` means more bytes are needed. A malformed body is reported
    /// as an error but consumed, so the caller can keep polling. An
    /// oversized length prefix poisons the framing; the buffered bytes are
    /// discarded.
    pub fn next_chunk(&mut self) -> Result<Option<EncodedChunk>, PlayoutError> {
        let Some((length, prefix_len)) = ChunkWireFormat::peek_varint(&self.buffer) else {
            return Ok(None);
        };

        let length = length as usize;
        if length > self.max_chunk_size {
            warn!(
                "Discarding {} buffered bytes after oversized chunk prefix ({} bytes)",
                self.buffer.len(),
                length
            );
            self.buffer.clear();
            self.chunks_rejected += 1;
            return Err(PlayoutError::ChunkTooLarge {
                size: length,
                max_size: self.max_chunk_size,
            });
        }

        if self.buffer.len() < prefix_len + length {
            return Ok(None);
        }

        self.buffer.advance(prefix_len);
        let body = self.buffer.split_to(length).freeze();

        match ChunkWireFormat::decode_chunk(body) {
            Ok(chunk) => {
                self.chunks_decoded += 1;
                Ok(Some(chunk))
            }
            Err(e) => {
                debug!("Rejected malformed chunk of {} bytes: {}", length, e);
                self.chunks_rejected += 1;
                Err(e)
            }
        }
    }

    /// Push bytes and collect every chunk that became complete.
    ///
    /// Malformed chunks are skipped; their errors are returned alongside.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<EncodedChunk>, Vec<PlayoutError>) {
        self.push(data);

        let mut chunks = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.next_chunk() {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => break,
                Err(e @ PlayoutError::ChunkTooLarge { .. }) => {
                    errors.push(e);
                    break;
                }
                Err(e) => errors.push(e),
            }
        }
        (chunks, errors)
    }

    /// Bytes waiting for the rest of their chunk
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Chunks successfully decoded so far
    pub fn chunks_decoded(&self) -> u64 {
        self.chunks_decoded
    }

    /// Chunks rejected as malformed or oversized
    pub fn chunks_rejected(&self) -> u64 {
        self.chunks_rejected
    }
}

impl Default for ChunkDemuxer {
    fn default() -> Self {
        Self::new()
    }
}
