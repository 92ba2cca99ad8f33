//! # MoQ Play Core
//!
//! Session abstraction and chunk wire format for the moqplay playout
//! pipeline. This crate turns subscribed track byte streams into
//! [`EncodedChunk`]s and defines the [`MediaSession`] seam the player
//! consumes.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod session;
pub mod wire;

// Re-export main types
pub use chunk::{EncodedChunk, MediaType};
pub use error::PlayoutError;
pub use session::{
    LoopbackSession, MediaSession, SessionState, Subscription, SubscriptionHandle,
    TrackNamespace, TrackPublisher,
};
pub use wire::{ChunkDemuxer, ChunkWireFormat, CHUNK_HEADER_LEN, DEFAULT_MAX_CHUNK_SIZE};
