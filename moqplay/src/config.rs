//! Configuration types and defaults

use crate::ladder::{Resolution, VideoState};
use moqplay_core::PlayoutError;
use moqplay_media::{RateMonitorConfig, RateTier, SyncConfig, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Track names making up the rate ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Namespace all ladder tracks are published under
    pub namespace: String,
    /// Audio track
    pub audio_track: String,
    /// Full-rate high resolution
    pub hd_track: String,
    /// Reduced-rate high resolution
    pub hd_reduced_track: String,
    /// Full-rate medium resolution
    pub md_track: String,
    /// Reduced-rate medium resolution
    pub md_reduced_track: String,
    /// Resolution subscribed at start
    pub initial_resolution: Resolution,
    /// Extra subscribe attempts before falling back to the other resolution
    pub subscribe_retries: u32,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            namespace: "live".to_string(),
            audio_track: "audio".to_string(),
            hd_track: "hd".to_string(),
            hd_reduced_track: "hd-reduced".to_string(),
            md_track: "md".to_string(),
            md_reduced_track: "md-reduced".to_string(),
            initial_resolution: Resolution::Hd,
            subscribe_retries: 1,
        }
    }
}

impl LadderConfig {
    /// Track name serving a video state
    pub fn track_name(&self, state: VideoState) -> &str {
        match state {
            VideoState::NormalHd => &self.hd_track,
            VideoState::ReducedHd => &self.hd_reduced_track,
            VideoState::NormalMd => &self.md_track,
            VideoState::ReducedMd => &self.md_reduced_track,
        }
    }

    /// Video state served by a track name, if it is on the ladder
    pub fn state_for(&self, name: &str) -> Option<VideoState> {
        VideoState::ALL
            .into_iter()
            .find(|state| self.track_name(*state) == name)
    }

    /// Video track names in ladder order
    pub fn video_tracks(&self) -> [&str; 4] {
        VideoState::ALL.map(|state| self.track_name(state))
    }

    /// State subscribed at start
    pub fn initial_state(&self) -> VideoState {
        VideoState::new(self.initial_resolution, RateTier::Normal)
    }

    fn validate(&self) -> Result<(), PlayoutError> {
        if self.namespace.is_empty() {
            return Err(PlayoutError::MissingConfiguration {
                field: "ladder.namespace".to_string(),
            });
        }

        let mut names = vec![self.audio_track.as_str()];
        names.extend(self.video_tracks());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(PlayoutError::InvalidConfiguration {
                    reason: "Ladder track names must not be empty".to_string(),
                });
            }
            if names[..i].contains(name) {
                return Err(PlayoutError::InvalidConfiguration {
                    reason: format!("Ladder track name '{}' is used twice", name),
                });
            }
        }
        Ok(())
    }
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Video against audio pacing
    pub sync: SyncConfig,
    /// Adaptation thresholds
    pub rate_monitor: RateMonitorConfig,
    /// Track worker behaviour
    pub worker: WorkerConfig,
    /// Ladder track names
    pub ladder: LadderConfig,
    /// Interval between condition reports; no profiling when unset
    pub profiler_interval_ms: Option<u64>,
    /// Wait before asking again when audio playback runs dry
    pub audio_retry_ms: u64,
}

impl PlayerConfig {
    /// Short warm-up, quick to adapt down
    pub fn low_latency() -> Self {
        Self {
            worker: WorkerConfig {
                warm_up_ms: 500,
                ..WorkerConfig::default()
            },
            rate_monitor: RateMonitorConfig::low_latency(),
            ..Self::default()
        }
    }

    /// Long warm-up, wide drop tolerance after adapting
    pub fn resilient() -> Self {
        Self {
            sync: SyncConfig {
                relaxed_drop_multiplier: 3.0,
                ..SyncConfig::default()
            },
            worker: WorkerConfig {
                warm_up_ms: 2000,
                ..WorkerConfig::default()
            },
            rate_monitor: RateMonitorConfig::resilient(),
            profiler_interval_ms: Some(5000),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, PlayoutError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PlayoutError::InvalidConfiguration {
                reason: format!("Invalid player configuration: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlayoutError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| PlayoutError::InvalidConfiguration {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Profiler interval, if profiling is enabled
    pub fn profiler_interval(&self) -> Option<Duration> {
        self.profiler_interval_ms.map(Duration::from_millis)
    }

    /// Retry interval for a dry audio buffer
    pub fn audio_retry(&self) -> Duration {
        Duration::from_millis(self.audio_retry_ms.max(1))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PlayoutError> {
        let invalid = |reason: &str| {
            Err(PlayoutError::InvalidConfiguration {
                reason: reason.to_string(),
            })
        };

        if self.sync.frame_interval_us <= 0 {
            return invalid("sync.frame_interval_us must be positive");
        }
        if self.sync.delay_tolerance() < 0 || self.sync.drop_tolerance() < 0 {
            return invalid("sync tolerances must not be negative");
        }
        if !(self.sync.relaxed_drop_multiplier >= 1.0) {
            return invalid("sync.relaxed_drop_multiplier must be at least 1.0");
        }

        let rate = &self.rate_monitor;
        if !(rate.drop_ratio_threshold > 0.0 && rate.drop_ratio_threshold <= 1.0) {
            return invalid("rate_monitor.drop_ratio_threshold must be in (0, 1]");
        }
        if !(rate.jitter_threshold_ms > 0.0) {
            return invalid("rate_monitor.jitter_threshold_ms must be positive");
        }
        if rate.jitter_window_ms == 0 || rate.bitrate_window_ms == 0 {
            return invalid("rate_monitor windows must be positive");
        }
        if rate.max_samples < 3 {
            return invalid("rate_monitor.max_samples must be at least 3");
        }
        if rate.adapt_up_multiple == 0 {
            return invalid("rate_monitor.adapt_up_multiple must be positive");
        }

        if self.worker.pool_capacity == 0 {
            return invalid("worker.pool_capacity must be positive");
        }
        if self.profiler_interval_ms == Some(0) {
            return invalid("profiler_interval_ms must be positive");
        }

        self.ladder.validate()
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            rate_monitor: RateMonitorConfig::default(),
            worker: WorkerConfig::default(),
            ladder: LadderConfig::default(),
            profiler_interval_ms: None,
            audio_retry_ms: 20, // one audio slice
        }
    }
}
