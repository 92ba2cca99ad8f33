//! # MoQ Play - Adaptive Audio/Video Playout
//!
//! MoQ Play turns Media over QUIC style track subscriptions into timed,
//! synchronized render calls. Each track gets its own decode worker that
//! restores presentation order, video is paced against audio playback, and
//! the player moves between reduced and full rate variants of the video
//! ladder as network conditions change.
//!
//! ## Key Features
//!
//! - **Per-track decode workers**: asynchronous decoding into pooled buffers
//! - **Presentation order**: decoded units are reordered by timestamp
//! - **Audio-driven sync**: video frames are rendered, held or dropped against the audio clock
//! - **Rate adaptation**: jitter and drop monitoring drive the reduced/full rate toggle
//! - **Track switching**: unsubscribe-then-subscribe with retry and resolution fallback
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use moqplay::{DecodedUnit, LoopbackSession, Player, RenderSink};
//! use std::sync::Arc;
//!
//! struct Screen;
//!
//! #[async_trait]
//! impl RenderSink for Screen {
//!     async fn on_frame_ready(&self, unit: DecodedUnit) {
//!         println!("frame {}", unit.timestamp_us);
//!     }
//!
//!     async fn on_audio_ready(&self, unit: DecodedUnit) {
//!         println!("audio {}", unit.timestamp_us);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     moqplay::init_logging(moqplay::DEFAULT_FILTER)?;
//!
//!     let session = LoopbackSession::new();
//!     let mut player = Player::builder(Arc::new(session), Arc::new(Screen))
//!         .start()
//!         .await?;
//!
//!     let mut events = player.events().expect("first call");
//!     while let Some(event) = events.next().await {
//!         println!("Player event: {:?}", event);
//!     }
//!
//!     player.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use moqplay_core::{
    ChunkDemuxer, ChunkWireFormat, EncodedChunk, LoopbackSession, MediaSession, MediaType,
    PlayoutError, SessionState, Subscription, SubscriptionHandle, TrackNamespace, TrackPublisher,
};

pub use moqplay_media::{
    AdaptationSignal, DecodedPayload, DecodedUnit, DecoderFactory, DropReason, MediaError,
    PassthroughDecoderFactory, RateMonitorConfig, RateTier, SyncConfig, WorkerConfig,
    WorkerStats,
};

pub use moqplay_diagnostics::{
    init_logging, init_test_logging, ConditionReport, TrackConditions, DEFAULT_FILTER,
};

// Public API modules
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod ladder;
pub mod player;

// Re-export main API types
pub use catalog::{Catalog, CatalogTrack, SelectionParams};
pub use config::{LadderConfig, PlayerConfig};
pub use error::{PlayerError, PlayerResult};
pub use event::{EventStream, PlayerEvent};
pub use ladder::{
    LadderSnapshot, Resolution, TrackLadder, TrackSwitchCoordinator, VideoState,
};
pub use player::{Player, PlayerBuilder, RenderSink};
