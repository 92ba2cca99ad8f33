//! Rate ladder and track switching
//!
//! The ladder offers two video resolutions, each at a full and a reduced
//! rate, next to one fixed audio track. [`TrackSwitchCoordinator`] keeps
//! exactly one video and one audio subscription alive and moves between
//! ladder entries by unsubscribing the current video track before
//! subscribing the next one. Rate switches only toggle the rate within the
//! current resolution.

use crate::config::LadderConfig;
use moqplay_core::{MediaSession, PlayoutError, Subscription, SubscriptionHandle, TrackNamespace};
use moqplay_media::{AdaptationSignal, RateTier};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Video resolution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// High definition
    Hd,
    /// Medium definition
    Md,
}

impl Resolution {
    /// The other resolution
    pub fn other(self) -> Self {
        match self {
            Resolution::Hd => Resolution::Md,
            Resolution::Md => Resolution::Hd,
        }
    }
}

/// Selected video variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    /// Full-rate HD
    NormalHd,
    /// Reduced-rate HD
    ReducedHd,
    /// Full-rate MD
    NormalMd,
    /// Reduced-rate MD
    ReducedMd,
}

impl VideoState {
    /// Every state, in ladder order
    pub const ALL: [VideoState; 4] = [
        VideoState::NormalHd,
        VideoState::ReducedHd,
        VideoState::NormalMd,
        VideoState::ReducedMd,
    ];

    /// State for a resolution and rate tier
    pub fn new(resolution: Resolution, tier: RateTier) -> Self {
        match (resolution, tier) {
            (Resolution::Hd, RateTier::Normal) => VideoState::NormalHd,
            (Resolution::Hd, RateTier::Reduced) => VideoState::ReducedHd,
            (Resolution::Md, RateTier::Normal) => VideoState::NormalMd,
            (Resolution::Md, RateTier::Reduced) => VideoState::ReducedMd,
        }
    }

    /// Resolution of this state
    pub fn resolution(self) -> Resolution {
        match self {
            VideoState::NormalHd | VideoState::ReducedHd => Resolution::Hd,
            VideoState::NormalMd | VideoState::ReducedMd => Resolution::Md,
        }
    }

    /// Rate tier of this state
    pub fn tier(self) -> RateTier {
        match self {
            VideoState::NormalHd | VideoState::NormalMd => RateTier::Normal,
            VideoState::ReducedHd | VideoState::ReducedMd => RateTier::Reduced,
        }
    }

    /// State after an adaptation signal; the resolution never changes
    pub fn on_signal(self, signal: AdaptationSignal) -> Self {
        let tier = match signal {
            AdaptationSignal::Down => RateTier::Reduced,
            AdaptationSignal::Up => RateTier::Normal,
        };
        Self::new(self.resolution(), tier)
    }

    /// Same rate tier at another resolution
    pub fn with_resolution(self, resolution: Resolution) -> Self {
        Self::new(resolution, self.tier())
    }
}

/// One live ladder subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderEntry {
    /// Logical track name
    pub name: String,
    /// Live subscription serving it
    pub handle: SubscriptionHandle,
}

/// Live subscriptions by logical name; one audio and one video slot
#[derive(Debug, Clone, Default)]
pub struct TrackLadder {
    audio: Option<LadderEntry>,
    video: Option<(LadderEntry, VideoState)>,
}

impl TrackLadder {
    /// Empty ladder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the audio entry, returning the previous one
    pub fn set_audio(&mut self, entry: LadderEntry) -> Option<LadderEntry> {
        self.audio.replace(entry)
    }

    /// Replace the video entry, returning the previous one
    pub fn set_video(&mut self, entry: LadderEntry, state: VideoState) -> Option<LadderEntry> {
        self.video.replace((entry, state)).map(|(entry, _)| entry)
    }

    /// Remove and return the video entry
    pub fn take_video(&mut self) -> Option<LadderEntry> {
        self.video.take().map(|(entry, _)| entry)
    }

    /// Remove and return the audio entry
    pub fn take_audio(&mut self) -> Option<LadderEntry> {
        self.audio.take()
    }

    /// Current audio entry
    pub fn audio(&self) -> Option<&LadderEntry> {
        self.audio.as_ref()
    }

    /// Current video entry
    pub fn video(&self) -> Option<&LadderEntry> {
        self.video.as_ref().map(|(entry, _)| entry)
    }

    /// State of the current video entry
    pub fn video_state(&self) -> Option<VideoState> {
        self.video.as_ref().map(|(_, state)| *state)
    }

    /// Entry for a logical name
    pub fn get(&self, name: &str) -> Option<&LadderEntry> {
        self.entries().into_iter().find(|entry| entry.name == name)
    }

    /// Live entries, audio first
    pub fn entries(&self) -> Vec<&LadderEntry> {
        self.audio().into_iter().chain(self.video()).collect()
    }

    /// Whether deliveries on `handle` belong to a live entry
    pub fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.entries().iter().any(|entry| entry.handle.id == handle.id)
    }

    /// Serializable view of the ladder
    pub fn snapshot(&self) -> LadderSnapshot {
        LadderSnapshot {
            audio: self.audio().map(|entry| entry.name.clone()),
            video: self.video().map(|entry| entry.name.clone()),
            video_state: self.video_state(),
        }
    }
}

/// Ladder shared between the coordinator and the track readers
pub type SharedLadder = Arc<RwLock<TrackLadder>>;

/// Current ladder selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSnapshot {
    /// Audio track name
    pub audio: Option<String>,
    /// Video track name
    pub video: Option<String>,
    /// Video variant
    pub video_state: Option<VideoState>,
}

/// Result of a completed video switch
#[derive(Debug)]
pub struct SwitchOutcome {
    /// State before the switch
    pub previous: Option<VideoState>,
    /// State now live
    pub state: VideoState,
    /// Track name now live
    pub track_name: String,
    /// The target failed and the other resolution was used instead
    pub fell_back: bool,
    /// New subscription to read chunks from
    pub subscription: Subscription,
}

/// Moves the player between ladder entries
#[derive(Debug)]
pub struct TrackSwitchCoordinator {
    session: Arc<dyn MediaSession>,
    config: LadderConfig,
    ladder: SharedLadder,
    available: Option<Vec<String>>,
}

impl TrackSwitchCoordinator {
    /// Create a coordinator with an empty ladder
    pub fn new(session: Arc<dyn MediaSession>, config: LadderConfig) -> Self {
        Self {
            session,
            config,
            ladder: Arc::new(RwLock::new(TrackLadder::new())),
            available: None,
        }
    }

    /// Restrict selectable video tracks to the given names
    pub fn with_available_tracks(mut self, names: Vec<String>) -> Self {
        self.available = Some(names);
        self
    }

    /// Ladder track names
    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// Ladder handle for subscription identity checks
    pub fn ladder(&self) -> SharedLadder {
        Arc::clone(&self.ladder)
    }

    /// Current selection
    pub fn snapshot(&self) -> LadderSnapshot {
        self.ladder.read().snapshot()
    }

    /// Current video state
    pub fn video_state(&self) -> Option<VideoState> {
        self.ladder.read().video_state()
    }

    /// Whether deliveries on `handle` should still be consumed
    pub fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.ladder.read().is_current(handle)
    }

    /// Subscribe the audio track, retrying on failure
    pub async fn subscribe_audio(&self) -> Result<Subscription, PlayoutError> {
        let name = self.config.audio_track.clone();
        let subscription = self.subscribe_with_retry(&name).await?;
        let previous = self.ladder.write().set_audio(LadderEntry {
            name,
            handle: subscription.handle.clone(),
        });
        if let Some(previous) = previous {
            self.release(&previous).await;
        }
        Ok(subscription)
    }

    /// Subscribe the configured initial video state
    pub async fn start_video(&self) -> Result<SwitchOutcome, PlayoutError> {
        self.switch_to(self.config.initial_state()).await
    }

    /// Apply a rate adaptation signal. Returns `None` when the ladder is
    /// already at the requested tier.
    pub async fn apply_signal(
        &self,
        signal: AdaptationSignal,
    ) -> Result<Option<SwitchOutcome>, PlayoutError> {
        let Some(current) = self.video_state() else {
            return Err(PlayoutError::InvalidState {
                expected: "video subscribed".to_string(),
                actual: "no video subscription".to_string(),
            });
        };
        let target = current.on_signal(signal);
        if target == current {
            debug!("Ignoring {:?} signal, already at {:?}", signal, current);
            return Ok(None);
        }
        info!("🪜 Adapting {:?}: {:?} -> {:?}", signal, current, target);
        self.switch_to(target).await.map(Some)
    }

    /// Select a video track by name, keeping the current rate tier.
    /// Returns `None` when the resolution is already selected.
    pub async fn select_track(&self, name: &str) -> Result<Option<SwitchOutcome>, PlayoutError> {
        let requested = self.config.state_for(name).ok_or_else(|| PlayoutError::TrackNotFound {
            track_namespace: TrackNamespace::new(&self.config.namespace, name).to_string(),
        })?;
        if !self.is_available(name) {
            return Err(PlayoutError::TrackNotFound {
                track_namespace: TrackNamespace::new(&self.config.namespace, name).to_string(),
            });
        }

        let target = match self.video_state() {
            Some(current) if current.resolution() == requested.resolution() => return Ok(None),
            Some(current) => current.with_resolution(requested.resolution()),
            None => requested,
        };
        info!("🖐️ Selecting {} ({:?})", name, target);
        self.switch_to(target).await.map(Some)
    }

    /// Replace the video subscription with `target`.
    ///
    /// The current video track is unsubscribed first. The target is retried
    /// `subscribe_retries` times; after that the other resolution at the same
    /// rate tier is tried the same way.
    pub async fn switch_to(&self, target: VideoState) -> Result<SwitchOutcome, PlayoutError> {
        let previous_state = self.video_state();
        let previous = self.ladder.write().take_video();
        if let Some(previous) = previous {
            self.release(&previous).await;
        }

        let (state, subscription, fell_back) = match self.subscribe_state(target).await {
            Ok(subscription) => (target, subscription, false),
            Err(e) => {
                let fallback = target.with_resolution(target.resolution().other());
                warn!(
                    "⚠️ Could not subscribe {:?} ({}), falling back to {:?}",
                    target, e, fallback
                );
                let subscription = self.subscribe_state(fallback).await?;
                (fallback, subscription, true)
            }
        };

        let track_name = self.config.track_name(state).to_string();
        self.ladder.write().set_video(
            LadderEntry {
                name: track_name.clone(),
                handle: subscription.handle.clone(),
            },
            state,
        );
        info!("📺 Video now on {} ({:?})", track_name, state);

        Ok(SwitchOutcome {
            previous: previous_state,
            state,
            track_name,
            fell_back,
            subscription,
        })
    }

    /// Unsubscribe every live entry
    pub async fn close(&self) {
        let (audio, video) = {
            let mut ladder = self.ladder.write();
            (ladder.take_audio(), ladder.take_video())
        };
        for entry in audio.iter().chain(video.iter()) {
            self.release(entry).await;
        }
    }

    async fn subscribe_state(&self, state: VideoState) -> Result<Subscription, PlayoutError> {
        let name = self.config.track_name(state).to_string();
        if !self.is_available(&name) {
            return Err(PlayoutError::TrackNotFound {
                track_namespace: TrackNamespace::new(&self.config.namespace, name).to_string(),
            });
        }
        self.subscribe_with_retry(&name).await
    }

    async fn subscribe_with_retry(&self, name: &str) -> Result<Subscription, PlayoutError> {
        let track = TrackNamespace::new(&self.config.namespace, name);
        let mut attempt = 0;
        loop {
            match self.session.subscribe(track.clone()).await {
                Ok(subscription) => return Ok(subscription),
                Err(e) if attempt < self.config.subscribe_retries => {
                    attempt += 1;
                    warn!("Subscribe to {} failed ({}), retrying", track, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn release(&self, entry: &LadderEntry) {
        if let Err(e) = self.session.unsubscribe(&entry.handle).await {
            warn!("Failed to unsubscribe {}: {}", entry.name, e);
        }
    }

    fn is_available(&self, name: &str) -> bool {
        self.available
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == name))
    }
}
