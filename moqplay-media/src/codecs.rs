//! Codec interfaces and reference decoders
//!
//! A track worker owns one [`ChunkDecoder`]. Decoding is asynchronous: the
//! worker submits a [`DecodeRequest`] and the decoder later pushes a
//! [`DecodeOutput`] with the same sequence number onto the output channel it
//! was created with. Outputs may arrive in any order and may carry errors.

use crate::error::{MediaError, MediaResult};
use crate::pool::FramePool;
use crate::tracks::{AudioFrame, DecodedPayload, DecodedUnit, VideoFrame};
use bytes::Bytes;
use moqplay_core::MediaType;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Codec information
#[derive(Debug, Clone)]
pub struct CodecInfo {
    /// Codec name
    pub name: String,
    /// MIME type
    pub mime_type: String,
    /// Sample rate (for audio)
    pub sample_rate: Option<u32>,
    /// Channels (for audio)
    pub channels: Option<u8>,
}

/// One chunk submitted for decoding
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    /// Submission sequence number, echoed back in the output
    pub seq: u64,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Whether the chunk is independently decodable
    pub is_key: bool,
    /// Compressed payload
    pub payload: Bytes,
}

/// Completion of one decode request
#[derive(Debug)]
pub struct DecodeOutput {
    /// Sequence number of the request this completes
    pub seq: u64,
    /// Timestamp of the request this completes
    pub timestamp_us: i64,
    /// Decoded unit, or the non-fatal decode error
    pub result: MediaResult<DecodedUnit>,
}

/// Channel a decoder delivers its outputs on
pub type DecoderOutput = mpsc::UnboundedSender<DecodeOutput>;

/// Asynchronous decoder instance owned by a single track worker
pub trait ChunkDecoder: Send + std::fmt::Debug {
    /// Get codec information
    fn codec_info(&self) -> CodecInfo;

    /// Submit a chunk. An error here means the chunk was not accepted and
    /// no output will follow for it.
    fn decode(&mut self, request: DecodeRequest) -> MediaResult<()>;

    /// Release codec resources; no outputs are produced afterwards
    fn close(&mut self) {}
}

/// Creates decoder instances for track workers
pub trait DecoderFactory: Send + Sync + std::fmt::Debug {
    /// Create a decoder for `media_type` writing into buffers from `pool`.
    ///
    /// Failure here is fatal to the requesting worker.
    fn create(
        &self,
        media_type: MediaType,
        output: DecoderOutput,
        pool: FramePool,
    ) -> MediaResult<Box<dyn ChunkDecoder>>;
}

/// Synchronous decoder trait - real codecs implement this
pub trait SyncDecoder: Send + Sync + std::fmt::Debug {
    /// Decode one chunk into a pooled buffer
    fn decode_sync(&self, request: &DecodeRequest, pool: &FramePool)
        -> MediaResult<DecodedPayload>;

    /// Get codec information
    fn codec_info(&self) -> CodecInfo;
}

fn complete<D: SyncDecoder + ?Sized>(
    codec: &D,
    request: &DecodeRequest,
    pool: &FramePool,
) -> DecodeOutput {
    let result = codec
        .decode_sync(request, pool)
        .map(|payload| DecodedUnit {
            timestamp_us: request.timestamp_us,
            payload,
        });
    DecodeOutput {
        seq: request.seq,
        timestamp_us: request.timestamp_us,
        result,
    }
}

/// Runs a [`SyncDecoder`] on the submitting task and completes immediately
#[derive(Debug)]
pub struct InlineDecoder<D: SyncDecoder> {
    codec: D,
    output: DecoderOutput,
    pool: FramePool,
}

impl<D: SyncDecoder> InlineDecoder<D> {
    /// Wrap a synchronous codec
    pub fn new(codec: D, output: DecoderOutput, pool: FramePool) -> Self {
        Self {
            codec,
            output,
            pool,
        }
    }
}

impl<D: SyncDecoder> ChunkDecoder for InlineDecoder<D> {
    fn codec_info(&self) -> CodecInfo {
        self.codec.codec_info()
    }

    fn decode(&mut self, request: DecodeRequest) -> MediaResult<()> {
        let output = complete(&self.codec, &request, &self.pool);
        self.output
            .send(output)
            .map_err(|_| MediaError::InvalidState {
                message: "decoder output channel closed".to_string(),
            })
    }
}

/// Runs a [`SyncDecoder`] on the blocking thread pool.
///
/// Each request is decoded on its own blocking task, so outputs can
/// complete out of submission order.
#[derive(Debug)]
pub struct BlockingDecoder<D: SyncDecoder + 'static> {
    codec: Arc<D>,
    output: DecoderOutput,
    pool: FramePool,
    runtime: tokio::runtime::Handle,
    closed: bool,
}

impl<D: SyncDecoder + 'static> BlockingDecoder<D> {
    /// Wrap a synchronous codec; must be called from within a tokio runtime
    pub fn new(codec: D, output: DecoderOutput, pool: FramePool) -> MediaResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MediaError::CodecInitializationFailed {
                codec: codec.codec_info().name,
                reason: format!("No async runtime: {}", e),
            }
        })?;
        Ok(Self {
            codec: Arc::new(codec),
            output,
            pool,
            runtime,
            closed: false,
        })
    }
}

impl<D: SyncDecoder + 'static> ChunkDecoder for BlockingDecoder<D> {
    fn codec_info(&self) -> CodecInfo {
        self.codec.codec_info()
    }

    fn decode(&mut self, request: DecodeRequest) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::InvalidState {
                message: "decoder is closed".to_string(),
            });
        }
        let codec = Arc::clone(&self.codec);
        let output = self.output.clone();
        let pool = self.pool.clone();
        self.runtime.spawn_blocking(move || {
            // Receiver is gone once the worker retired this decoder.
            let _ = output.send(complete(codec.as_ref(), &request, &pool));
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Reference codec that copies the compressed payload into a decoded frame
#[derive(Debug, Clone)]
pub struct PassthroughCodec {
    media_type: MediaType,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u8,
}

impl PassthroughCodec {
    /// Video codec producing `width`×`height` pictures
    pub fn video(width: u32, height: u32) -> Self {
        Self {
            media_type: MediaType::Video,
            width,
            height,
            sample_rate: 0,
            channels: 0,
        }
    }

    /// Audio codec producing samples at `sample_rate` with `channels`
    pub fn audio(sample_rate: u32, channels: u8) -> Self {
        Self {
            media_type: MediaType::Audio,
            width: 0,
            height: 0,
            sample_rate,
            channels,
        }
    }
}

impl SyncDecoder for PassthroughCodec {
    fn decode_sync(
        &self,
        request: &DecodeRequest,
        pool: &FramePool,
    ) -> MediaResult<DecodedPayload> {
        let data = pool
            .acquire_copy(&request.payload)
            .ok_or(MediaError::PoolExhausted {
                capacity: pool.capacity(),
            })?;

        Ok(match self.media_type {
            MediaType::Video => DecodedPayload::Picture(VideoFrame {
                data,
                width: self.width,
                height: self.height,
                is_keyframe: request.is_key,
            }),
            MediaType::Audio => DecodedPayload::Samples(AudioFrame {
                data,
                sample_rate: self.sample_rate,
                channels: self.channels,
            }),
        })
    }

    fn codec_info(&self) -> CodecInfo {
        match self.media_type {
            MediaType::Video => CodecInfo {
                name: "passthrough-video".to_string(),
                mime_type: "video/raw".to_string(),
                sample_rate: None,
                channels: None,
            },
            MediaType::Audio => CodecInfo {
                name: "passthrough-audio".to_string(),
                mime_type: "audio/raw".to_string(),
                sample_rate: Some(self.sample_rate),
                channels: Some(self.channels),
            },
        }
    }
}

/// Factory for [`PassthroughCodec`] decoders
#[derive(Debug, Clone)]
pub struct PassthroughDecoderFactory {
    /// Picture size reported for video
    pub video_size: (u32, u32),
    /// Sample rate reported for audio
    pub sample_rate: u32,
    /// Channel count reported for audio
    pub channels: u8,
    /// Decode on the blocking pool instead of inline
    pub blocking: bool,
}

impl Default for PassthroughDecoderFactory {
    fn default() -> Self {
        Self {
            video_size: (1920, 1080),
            sample_rate: 48_000,
            channels: 2,
            blocking: false,
        }
    }
}

impl DecoderFactory for PassthroughDecoderFactory {
    fn create(
        &self,
        media_type: MediaType,
        output: DecoderOutput,
        pool: FramePool,
    ) -> MediaResult<Box<dyn ChunkDecoder>> {
        let codec = match media_type {
            MediaType::Video => PassthroughCodec::video(self.video_size.0, self.video_size.1),
            MediaType::Audio => PassthroughCodec::audio(self.sample_rate, self.channels),
        };
        debug!("Creating {} decoder (blocking: {})", codec.codec_info().name, self.blocking);

        if self.blocking {
            Ok(Box::new(BlockingDecoder::new(codec, output, pool)?))
        } else {
            Ok(Box::new(InlineDecoder::new(codec, output, pool)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(seq: u64, timestamp_us: i64) -> DecodeRequest {
        DecodeRequest {
            seq,
            timestamp_us,
            is_key: true,
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        }
    }

    #[tokio::test]
    async fn test_inline_decoder_completes_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = FramePool::new(4);
        let mut decoder = PassthroughDecoderFactory::default()
            .create(MediaType::Video, tx, pool.clone())
            .unwrap();

        decoder.decode(request(7, 33_333)).unwrap();
        let output = rx.try_recv().unwrap();
        assert_eq!(output.seq, 7);
        let unit = output.result.unwrap();
        assert_eq!(unit.timestamp_us, 33_333);
        assert_eq!(unit.media_type(), MediaType::Video);
        assert_eq!(pool.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_blocking_decoder_delivers_outputs() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = PassthroughDecoderFactory {
            blocking: true,
            ..Default::default()
        };
        let mut decoder = factory
            .create(MediaType::Audio, tx, FramePool::new(8))
            .unwrap();
        assert_eq!(decoder.codec_info().sample_rate, Some(48_000));

        for seq in 0..3 {
            decoder.decode(request(seq, seq as i64 * 20_000)).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().seq);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);

        decoder.close();
        assert!(decoder.decode(request(3, 60_000)).is_err());
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_a_decode_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut decoder = PassthroughDecoderFactory::default()
            .create(MediaType::Video, tx, FramePool::new(1))
            .unwrap();

        decoder.decode(request(0, 0)).unwrap();
        decoder.decode(request(1, 33_333)).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(first.result.is_ok());
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second.result,
            Err(MediaError::PoolExhausted { capacity: 1 })
        ));
    }
}
