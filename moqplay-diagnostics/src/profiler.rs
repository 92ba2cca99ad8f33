//! Playout condition profiling
//!
//! Periodically asks each track worker for a stats snapshot and condenses it
//! into a [`ConditionReport`] that is logged and optionally forwarded.

use chrono::{DateTime, Utc};
use moqplay_core::MediaType;
use moqplay_media::{RateTier, TrackWorkerHandle, WorkerStats};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Conditions observed on one track
#[derive(Debug, Clone, Serialize)]
pub struct TrackConditions {
    /// Track
    pub media_type: MediaType,
    /// Arrival jitter in milliseconds
    pub jitter_ms: f64,
    /// Dropped over received
    pub drop_ratio: f64,
    /// Recent receive bitrate (bits per second)
    pub bitrate_bps: f64,
    /// Units waiting for presentation
    pub buffer_size: usize,
    /// Underruns so far
    pub stale: u64,
    /// Units presented so far
    pub rendered: u64,
    /// Current rate tier
    pub tier: RateTier,
    /// Whether the track has adapted down
    pub rate_adapted: bool,
}

impl From<&WorkerStats> for TrackConditions {
    fn from(stats: &WorkerStats) -> Self {
        Self {
            media_type: stats.media_type,
            jitter_ms: stats.jitter_ms,
            drop_ratio: stats.drop_ratio,
            bitrate_bps: stats.bitrate_bps,
            buffer_size: stats.buffer_size,
            stale: stats.counters.stale,
            rendered: stats.counters.rendered,
            tier: stats.tier,
            rate_adapted: stats.rate_adapted,
        }
    }
}

/// Snapshot of playout conditions across tracks
#[derive(Debug, Clone, Serialize)]
pub struct ConditionReport {
    /// Profiler that produced the report
    pub profiler_id: Uuid,
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// One entry per live worker
    pub tracks: Vec<TrackConditions>,
}

impl ConditionReport {
    /// Conditions for one track
    pub fn track(&self, media_type: MediaType) -> Option<&TrackConditions> {
        self.tracks.iter().find(|t| t.media_type == media_type)
    }

    /// Serialize the report as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Collects condition reports from track workers
#[derive(Debug, Clone)]
pub struct PlayoutProfiler {
    id: Uuid,
    workers: Vec<TrackWorkerHandle>,
    interval: Duration,
}

impl PlayoutProfiler {
    /// Create a profiler reporting every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            workers: Vec::new(),
            interval,
        }
    }

    /// Profiler id carried in every report
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Add a worker to sample
    pub fn watch(&mut self, worker: TrackWorkerHandle) {
        self.workers.push(worker);
    }

    /// Take one snapshot. Closed workers are skipped.
    pub async fn snapshot(&self) -> ConditionReport {
        let mut tracks = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            match worker.stats().await {
                Ok(stats) => tracks.push(TrackConditions::from(&stats)),
                Err(e) => warn!("Skipping {} in condition report: {}", worker.media_type(), e),
            }
        }
        ConditionReport {
            profiler_id: self.id,
            generated_at: Utc::now(),
            tracks,
        }
    }

    /// Start periodic reporting. Reports are logged and, if `sink` is given,
    /// forwarded; the task ends when the sink closes or every worker is gone.
    pub fn start(self, sink: Option<mpsc::UnboundedSender<ConditionReport>>) -> JoinHandle<()> {
        info!("📊 Starting playout profiling every {:?}", self.interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.workers.iter().all(TrackWorkerHandle::is_closed) {
                    break;
                }

                let report = self.snapshot().await;
                for track in &report.tracks {
                    info!(
                        "📊 {}: jitter {:.1}ms, drops {:.1}%, {:.0} kbps, {} buffered, {:?} tier",
                        track.media_type,
                        track.jitter_ms,
                        track.drop_ratio * 100.0,
                        track.bitrate_bps / 1000.0,
                        track.buffer_size,
                        track.tier
                    );
                }

                if let Some(sink) = &sink {
                    if sink.send(report).is_err() {
                        break;
                    }
                }
            }
            info!("Stopping playout profiling");
        })
    }
}
