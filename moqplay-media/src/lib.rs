//! # MoQ Play Media
//!
//! Per-track decode workers for the moqplay playout pipeline: asynchronous
//! decoding into pooled buffers, presentation-order reconstruction,
//! audio-driven video synchronization and rate adaptation monitoring.

#![warn(clippy::all)]

pub mod adaptation;
pub mod codecs;
pub mod error;
pub mod pool;
pub mod reorder;
pub mod sync;
pub mod tracks;
pub mod worker;

// Re-export main types
pub use adaptation::{
    AdaptationCounters, AdaptationSignal, RateMonitor, RateMonitorConfig, RateTier,
};
pub use codecs::{
    BlockingDecoder, ChunkDecoder, CodecInfo, DecodeOutput, DecodeRequest, DecoderFactory,
    DecoderOutput, InlineDecoder, PassthroughCodec, PassthroughDecoderFactory, SyncDecoder,
};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use pool::{FrameBuffer, FramePool};
pub use reorder::ReorderBuffer;
pub use sync::{PlayoutSynchronizer, SyncConfig, SyncDecision, SyncState};
pub use tracks::{AudioFrame, DecodedPayload, DecodedUnit, Timestamped, VideoFrame};
pub use worker::{
    DropReason, Retrieved, TrackWorker, TrackWorkerBuilder, TrackWorkerHandle, WorkerConfig,
    WorkerEvent, WorkerStats,
};
