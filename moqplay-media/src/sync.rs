//! Audio-driven playout synchronization for video
//!
//! Both tracks carry timestamps on their own timelines. The first chunk seen
//! on each track fixes a reference timestamp; the difference between the two
//! references is the base offset that maps one timeline onto the other. A
//! video unit is rendered when its mapped time falls within a tolerance
//! window around the audio playback position.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tolerances applied when pacing video against audio
///
/// Both tolerances default to one nominal frame interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Nominal frame interval in microseconds
    pub frame_interval_us: i64,
    /// How far ahead of audio a frame may be before it is held back
    pub delay_tolerance_us: Option<i64>,
    /// How far behind audio a frame may be before it is dropped
    pub drop_tolerance_us: Option<i64>,
    /// Drop tolerance multiplier once the track has adapted down
    pub relaxed_drop_multiplier: f64,
}

impl SyncConfig {
    /// Tolerances of one frame at `frame_interval_us`
    pub fn for_frame_interval(frame_interval_us: i64) -> Self {
        Self {
            frame_interval_us,
            ..Self::default()
        }
    }

    /// Early limit in effect
    pub fn delay_tolerance(&self) -> i64 {
        self.delay_tolerance_us.unwrap_or(self.frame_interval_us)
    }

    /// Nominal late limit, before any relaxation
    pub fn drop_tolerance(&self) -> i64 {
        self.drop_tolerance_us.unwrap_or(self.frame_interval_us)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frame_interval_us: 33_333,
            delay_tolerance_us: None,
            drop_tolerance_us: None,
            relaxed_drop_multiplier: 2.0,
        }
    }
}

/// Reference timestamps, each fixed by the first chunk on its track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// First video timestamp observed
    pub video_ref: Option<i64>,
    /// First audio timestamp observed
    pub audio_ref: Option<i64>,
}

impl SyncState {
    /// Set the video reference. Returns false if it was already set.
    pub fn set_video_ref(&mut self, timestamp_us: i64) -> bool {
        if self.video_ref.is_some() {
            return false;
        }
        self.video_ref = Some(timestamp_us);
        true
    }

    /// Set the audio reference. Returns false if it was already set.
    pub fn set_audio_ref(&mut self, timestamp_us: i64) -> bool {
        if self.audio_ref.is_some() {
            return false;
        }
        self.audio_ref = Some(timestamp_us);
        true
    }

    /// `audio_ref - video_ref`, once both are known
    pub fn base_offset(&self) -> Option<i64> {
        Some(self.audio_ref? - self.video_ref?)
    }
}

/// Outcome of testing one video unit against the audio clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Within tolerance; render it
    Render,
    /// Ahead of audio; keep it buffered
    Delay,
    /// Behind audio; discard it and test the next unit
    Drop,
}

/// Decides render, delay or drop for video units
#[derive(Debug, Clone)]
pub struct PlayoutSynchronizer {
    config: SyncConfig,
    state: SyncState,
    relaxed: bool,
}

impl PlayoutSynchronizer {
    /// Create a synchronizer with no references set
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: SyncState::default(),
            relaxed: false,
        }
    }

    /// Current reference timestamps
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Mutable access to the reference timestamps
    pub fn state_mut(&mut self) -> &mut SyncState {
        &mut self.state
    }

    /// Widen the drop tolerance after a downward rate adaptation
    pub fn relax(&mut self) {
        if !self.relaxed {
            debug!("Relaxing video drop tolerance");
            self.relaxed = true;
        }
    }

    /// Restore the nominal drop tolerance
    pub fn tighten(&mut self) {
        self.relaxed = false;
    }

    /// Whether the drop tolerance is currently relaxed
    pub fn is_relaxed(&self) -> bool {
        self.relaxed
    }

    /// Drop tolerance currently in effect
    pub fn drop_tolerance_us(&self) -> i64 {
        if self.relaxed {
            (self.config.drop_tolerance() as f64 * self.config.relaxed_drop_multiplier) as i64
        } else {
            self.config.drop_tolerance()
        }
    }

    /// Signed lateness of `video_ts` against `audio_now`, mapped through the
    /// base offset. Positive means the frame is late.
    pub fn delta(&self, audio_now_us: i64, video_ts_us: i64) -> Option<i64> {
        let base = self.state.base_offset()?;
        Some((audio_now_us - video_ts_us) - base)
    }

    /// Test one unit. Without both references the unit is rendered as is.
    pub fn evaluate(&self, audio_now_us: i64, video_ts_us: i64) -> SyncDecision {
        let Some(delta) = self.delta(audio_now_us, video_ts_us) else {
            return SyncDecision::Render;
        };
        if delta < -self.config.delay_tolerance() {
            SyncDecision::Delay
        } else if delta > self.drop_tolerance_us() {
            SyncDecision::Drop
        } else {
            SyncDecision::Render
        }
    }
}
