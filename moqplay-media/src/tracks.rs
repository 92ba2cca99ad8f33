//! Decoded media unit types

use crate::pool::FrameBuffer;
use moqplay_core::MediaType;

/// Anything ordered by presentation timestamp
pub trait Timestamped {
    /// Presentation timestamp in microseconds
    fn timestamp_us(&self) -> i64;
}

/// Decoded audio samples
#[derive(Debug)]
pub struct AudioFrame {
    /// Interleaved f32 PCM samples, little endian
    pub data: FrameBuffer,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
}

impl AudioFrame {
    /// Number of samples per channel
    pub fn frames(&self) -> usize {
        let channels = usize::from(self.channels.max(1));
        self.data.len() / (4 * channels)
    }
}

/// Decoded picture
#[derive(Debug)]
pub struct VideoFrame {
    /// Raw picture bytes
    pub data: FrameBuffer,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Whether the source chunk was a key chunk
    pub is_keyframe: bool,
}

/// Payload of a decoded unit
#[derive(Debug)]
pub enum DecodedPayload {
    /// Decoded picture
    Picture(VideoFrame),
    /// Decoded samples
    Samples(AudioFrame),
}

/// Decoder output awaiting presentation.
///
/// Owns a pooled buffer; dropping the unit releases it.
#[derive(Debug)]
pub struct DecodedUnit {
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Decoded picture or samples
    pub payload: DecodedPayload,
}

impl DecodedUnit {
    /// Wrap a decoded picture
    pub fn picture(timestamp_us: i64, frame: VideoFrame) -> Self {
        Self {
            timestamp_us,
            payload: DecodedPayload::Picture(frame),
        }
    }

    /// Wrap decoded samples
    pub fn samples(timestamp_us: i64, frame: AudioFrame) -> Self {
        Self {
            timestamp_us,
            payload: DecodedPayload::Samples(frame),
        }
    }

    /// Media kind of the payload
    pub fn media_type(&self) -> MediaType {
        match self.payload {
            DecodedPayload::Picture(_) => MediaType::Video,
            DecodedPayload::Samples(_) => MediaType::Audio,
        }
    }

    /// Size of the decoded payload in bytes
    pub fn byte_len(&self) -> usize {
        match &self.payload {
            DecodedPayload::Picture(frame) => frame.data.len(),
            DecodedPayload::Samples(frame) => frame.data.len(),
        }
    }
}

impl Timestamped for DecodedUnit {
    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }
}
