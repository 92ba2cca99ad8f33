//! Track decode worker
//!
//! One worker per track runs as its own task and owns the track's decoder,
//! reorder buffer, synchronizer and rate monitor. The rest of the player
//! talks to it only through [`TrackWorkerHandle`] commands and the
//! [`WorkerEvent`] stream.

use crate::adaptation::{AdaptationCounters, AdaptationSignal, RateMonitor, RateMonitorConfig, RateTier};
use crate::codecs::{ChunkDecoder, DecodeOutput, DecodeRequest, DecoderFactory};
use crate::error::{MediaError, MediaResult};
use crate::pool::FramePool;
use crate::reorder::ReorderBuffer;
use crate::sync::{PlayoutSynchronizer, SyncConfig, SyncDecision, SyncState};
use crate::tracks::DecodedUnit;
use moqplay_core::{EncodedChunk, MediaType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Worker behaviour settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Time from the first accepted chunk until the buffer starts draining
    pub warm_up_ms: u64,
    /// Discard video delta chunks until the first key chunk
    pub key_frame_gating: bool,
    /// Maximum decoded buffers alive at once
    pub pool_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            warm_up_ms: 1000, // 1 second
            key_frame_gating: true,
            pool_capacity: 2048,
        }
    }
}

impl WorkerConfig {
    /// Warm-up interval as a duration
    pub fn warm_up(&self) -> Duration {
        Duration::from_millis(self.warm_up_ms)
    }
}

/// Why a chunk or unit was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Older than everything buffered; never decoded
    PreDecode,
    /// Decoded but too late for the audio clock
    Late,
}

/// Notifications emitted by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Warm-up finished; the buffer now drains
    Buffered {
        /// Track
        media_type: MediaType,
        /// Units buffered when draining began
        buffer_size: usize,
    },
    /// Rate adaptation requested
    Adaptation {
        /// Track
        media_type: MediaType,
        /// Direction
        signal: AdaptationSignal,
    },
    /// A chunk or unit was dropped
    Dropped {
        /// Track
        media_type: MediaType,
        /// Timestamp of the dropped data
        timestamp_us: i64,
        /// Why it was dropped
        reason: DropReason,
    },
    /// The next unit is ahead of the audio clock
    Delayed {
        /// Track
        media_type: MediaType,
        /// Timestamp of the held-back unit
        timestamp_us: i64,
    },
    /// Buffer underrun
    Stale {
        /// Track
        media_type: MediaType,
    },
    /// A chunk failed to decode and was skipped
    DecodeError {
        /// Track
        media_type: MediaType,
        /// Timestamp of the failed chunk
        timestamp_us: i64,
        /// Decoder message
        message: String,
    },
    /// The worker stopped because its decoder could not be created
    Failed {
        /// Track
        media_type: MediaType,
        /// Failure message
        message: String,
    },
}

impl WorkerEvent {
    /// Get event type as string for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::Buffered { .. } => "buffered",
            WorkerEvent::Adaptation { .. } => "adaptation",
            WorkerEvent::Dropped { .. } => "dropped",
            WorkerEvent::Delayed { .. } => "delayed",
            WorkerEvent::Stale { .. } => "stale",
            WorkerEvent::DecodeError { .. } => "decode_error",
            WorkerEvent::Failed { .. } => "failed",
        }
    }
}

/// Answer to a retrieve request
#[derive(Debug)]
pub enum Retrieved {
    /// Next unit to present
    Unit(DecodedUnit),
    /// The next unit is ahead of the audio clock; nothing to present yet
    Delayed,
    /// Underrun: nothing buffered while draining
    Stale,
    /// Nothing decoded yet
    Empty,
    /// Audio warm-up has not finished
    Buffering,
}

impl Retrieved {
    /// Take the unit, if any
    pub fn into_unit(self) -> Option<DecodedUnit> {
        match self {
            Retrieved::Unit(unit) => Some(unit),
            _ => None,
        }
    }
}

/// Snapshot of a worker's state
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    /// Track
    pub media_type: MediaType,
    /// Decoder generation; bumped on every reset
    pub generation: u64,
    /// Current rate tier
    pub tier: RateTier,
    /// Accumulated counters
    pub counters: AdaptationCounters,
    /// Units waiting in the reorder buffer
    pub buffer_size: usize,
    /// Chunks submitted but not yet decoded
    pub in_flight: usize,
    /// Whether warm-up has finished
    pub buffered: bool,
    /// Whether the drop tolerance is relaxed
    pub rate_adapted: bool,
    /// Arrival jitter in milliseconds
    pub jitter_ms: f64,
    /// Dropped over received
    pub drop_ratio: f64,
    /// Recent receive bitrate
    pub bitrate_bps: f64,
    /// Decoded buffers currently alive
    pub pool_outstanding: usize,
    /// Reference timestamps
    pub sync: SyncState,
}

enum WorkerCommand {
    Insert(EncodedChunk),
    Retrieve {
        at_audio_us: Option<i64>,
        reply: oneshot::Sender<Retrieved>,
    },
    SetSyncRef {
        media_type: MediaType,
        timestamp_us: i64,
    },
    Reset {
        tier: RateTier,
        reply: oneshot::Sender<MediaResult<()>>,
    },
    Stats {
        reply: oneshot::Sender<WorkerStats>,
    },
    Shutdown,
}

/// Cloneable handle to a running worker
#[derive(Debug, Clone)]
pub struct TrackWorkerHandle {
    media_type: MediaType,
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerCommand::Insert(chunk) => write!(f, "Insert({})", chunk.timestamp_us),
            WorkerCommand::Retrieve { at_audio_us, .. } => write!(f, "Retrieve({:?})", at_audio_us),
            WorkerCommand::SetSyncRef { media_type, timestamp_us } => {
                write!(f, "SetSyncRef({}, {})", media_type, timestamp_us)
            }
            WorkerCommand::Reset { tier, .. } => write!(f, "Reset({:?})", tier),
            WorkerCommand::Stats { .. } => f.write_str("Stats"),
            WorkerCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl TrackWorkerHandle {
    /// Track this worker serves
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Queue a chunk for decoding. Never waits.
    pub fn insert(&self, chunk: EncodedChunk) -> MediaResult<()> {
        if chunk.media_type != self.media_type {
            return Err(MediaError::InvalidMediaType {
                expected: self.media_type,
                actual: chunk.media_type,
            });
        }
        self.send(WorkerCommand::Insert(chunk))
    }

    /// Ask for the next unit to present.
    ///
    /// Video uses `at_audio_us`, the audio playback position, to pace
    /// against the audio clock; without it the earliest unit is returned.
    pub async fn retrieve(&self, at_audio_us: Option<i64>) -> MediaResult<Retrieved> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Retrieve { at_audio_us, reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Set a sync reference timestamp. Only the first value per track is kept.
    pub fn set_sync_ref(&self, media_type: MediaType, timestamp_us: i64) -> MediaResult<()> {
        self.send(WorkerCommand::SetSyncRef {
            media_type,
            timestamp_us,
        })
    }

    /// Discard buffered and in-flight data and recreate the decoder.
    ///
    /// Counters and sync references survive. A decoder creation failure
    /// stops the worker.
    pub async fn reset(&self, tier: RateTier) -> MediaResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Reset { tier, reply })?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Snapshot of counters and buffer state
    pub async fn stats(&self) -> MediaResult<WorkerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Stats { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Stop the worker, releasing everything it holds
    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    /// Whether the worker task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: WorkerCommand) -> MediaResult<()> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> MediaError {
        MediaError::WorkerClosed {
            media_type: self.media_type,
        }
    }
}

/// Builder for track workers
#[derive(Debug)]
pub struct TrackWorkerBuilder {
    media_type: MediaType,
    factory: Arc<dyn DecoderFactory>,
    config: WorkerConfig,
    sync: SyncConfig,
    rate: RateMonitorConfig,
    tier: RateTier,
}

impl TrackWorkerBuilder {
    /// Worker behaviour settings
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Synchronizer tolerances
    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Rate adaptation thresholds
    pub fn rate_monitor(mut self, rate: RateMonitorConfig) -> Self {
        self.rate = rate;
        self
    }

    /// Rate tier of the initial subscription
    pub fn tier(mut self, tier: RateTier) -> Self {
        self.tier = tier;
        self
    }

    /// Create the decoder and start the worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> MediaResult<(TrackWorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MediaError::InvalidState {
                message: format!("track worker needs a tokio runtime: {}", e),
            }
        })?;

        let pool = FramePool::new(self.config.pool_capacity);
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let decoder = self
            .factory
            .create(self.media_type, decoded_tx, pool.clone())?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = TrackWorker {
            media_type: self.media_type,
            config: self.config,
            factory: self.factory,
            pool,
            decoder,
            decoded_rx,
            commands: command_rx,
            events: event_tx,
            buffer: ReorderBuffer::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            generation: 0,
            sync: PlayoutSynchronizer::new(self.sync),
            monitor: RateMonitor::new(self.rate),
            tier: self.tier,
            seen_key: false,
            warm_up_at: None,
            buffered: false,
            drain_start_size: 0,
            rate_adapted: false,
            up_signalled: false,
        };
        info!(
            "🎞️ Starting {} worker with {} decoder",
            worker.media_type,
            worker.decoder.codec_info().name
        );
        runtime.spawn(worker.run());

        Ok((
            TrackWorkerHandle {
                media_type: self.media_type,
                commands: command_tx,
            },
            event_rx,
        ))
    }
}

/// Per-track decode actor. Start one with [`TrackWorker::builder`].
pub struct TrackWorker {
    media_type: MediaType,
    config: WorkerConfig,
    factory: Arc<dyn DecoderFactory>,
    pool: FramePool,
    decoder: Box<dyn ChunkDecoder>,
    decoded_rx: mpsc::UnboundedReceiver<DecodeOutput>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    buffer: ReorderBuffer<DecodedUnit>,
    in_flight: HashMap<u64, usize>,
    next_seq: u64,
    generation: u64,
    sync: PlayoutSynchronizer,
    monitor: RateMonitor,
    tier: RateTier,
    seen_key: bool,
    warm_up_at: Option<Instant>,
    buffered: bool,
    drain_start_size: usize,
    rate_adapted: bool,
    up_signalled: bool,
}

impl TrackWorker {
    /// Start building a worker for `media_type` using decoders from `factory`
    pub fn builder(media_type: MediaType, factory: Arc<dyn DecoderFactory>) -> TrackWorkerBuilder {
        TrackWorkerBuilder {
            media_type,
            factory,
            config: WorkerConfig::default(),
            sync: SyncConfig::default(),
            rate: RateMonitorConfig::default(),
            tier: RateTier::Normal,
        }
    }

    async fn run(mut self) {
        loop {
            let warm_up_pending = !self.buffered && self.warm_up_at.is_some();
            let warm_up_at = self.warm_up_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                Some(output) = self.decoded_rx.recv() => {
                    self.handle_output(output);
                }

                _ = tokio::time::sleep_until(warm_up_at), if warm_up_pending => {
                    self.finish_warm_up();
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
            }
        }

        self.decoder.close();
        self.buffer.clear();
        debug!("{} worker stopped", self.media_type);
    }

    fn handle_command(&mut self, command: WorkerCommand) -> bool {
        trace!(generation = self.generation, "{} worker command {:?}", self.media_type, command);
        match command {
            WorkerCommand::Insert(chunk) => self.handle_insert(chunk),
            WorkerCommand::Retrieve { at_audio_us, reply } => {
                let retrieved = self.handle_retrieve(at_audio_us);
                let _ = reply.send(retrieved);
            }
            WorkerCommand::SetSyncRef {
                media_type,
                timestamp_us,
            } => {
                let state = self.sync.state_mut();
                let set = match media_type {
                    MediaType::Video => state.set_video_ref(timestamp_us),
                    MediaType::Audio => state.set_audio_ref(timestamp_us),
                };
                if set {
                    info!("🔗 {} sync reference set to {}us", media_type, timestamp_us);
                }
            }
            WorkerCommand::Reset { tier, reply } => match self.reset(tier) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    error!("❌ {} worker failed to recreate its decoder: {}", self.media_type, e);
                    self.emit(WorkerEvent::Failed {
                        media_type: self.media_type,
                        message: e.to_string(),
                    });
                    let _ = reply.send(Err(e));
                    return false;
                }
            },
            WorkerCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    fn handle_insert(&mut self, chunk: EncodedChunk) {
        let now = Instant::now();
        self.monitor.record_arrival(now, chunk.size());

        if self.media_type == MediaType::Video && self.config.key_frame_gating && !self.seen_key {
            if !chunk.is_key {
                debug!("Discarding delta chunk {} before first key chunk", chunk.timestamp_us);
                return;
            }
            self.seen_key = true;
        }

        if self.warm_up_at.is_none() {
            self.warm_up_at = Some(now + self.config.warm_up());
        }

        if self.buffered {
            match self.buffer.min_timestamp() {
                Some(min) if chunk.timestamp_us < min => {
                    debug!(
                        "🔥 Pre-dropping {} chunk {} (buffer min {}), {} bytes",
                        self.media_type,
                        chunk.timestamp_us,
                        min,
                        chunk.size()
                    );
                    self.monitor.record_drop(chunk.size());
                    self.emit(WorkerEvent::Dropped {
                        media_type: self.media_type,
                        timestamp_us: chunk.timestamp_us,
                        reason: DropReason::PreDecode,
                    });
                    self.evaluate_adaptation();
                    return;
                }
                Some(_) => {}
                None => self.report_stale(),
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(seq, chunk.size());

        let request = DecodeRequest {
            seq,
            timestamp_us: chunk.timestamp_us,
            is_key: chunk.is_key,
            payload: chunk.payload,
        };
        if let Err(e) = self.decoder.decode(request) {
            self.in_flight.remove(&seq);
            self.report_decode_error(chunk.timestamp_us, &e);
        }
        self.evaluate_adaptation();
    }

    fn handle_output(&mut self, output: DecodeOutput) {
        if self.in_flight.remove(&output.seq).is_none() {
            trace!(seq = output.seq, "Ignoring output for abandoned decode");
            return;
        }

        match output.result {
            Ok(unit) => {
                self.monitor.record_decoded();
                self.buffer.insert(unit);
                self.check_adapt_up();
            }
            Err(e) => self.report_decode_error(output.timestamp_us, &e),
        }
    }

    fn handle_retrieve(&mut self, at_audio_us: Option<i64>) -> Retrieved {
        if self.media_type == MediaType::Audio && !self.buffered {
            return Retrieved::Buffering;
        }

        let Some(audio_now) = at_audio_us.filter(|_| self.media_type == MediaType::Video) else {
            return match self.buffer.extract_min() {
                Some(unit) => {
                    self.monitor.record_rendered();
                    Retrieved::Unit(unit)
                }
                None if self.buffered => {
                    self.report_stale();
                    Retrieved::Stale
                }
                None => Retrieved::Empty,
            };
        };

        let mut dropped_any = false;
        loop {
            let Some(next_ts) = self.buffer.min_timestamp() else {
                if dropped_any || self.buffered {
                    self.report_stale();
                    return Retrieved::Stale;
                }
                return Retrieved::Empty;
            };

            match self.sync.evaluate(audio_now, next_ts) {
                SyncDecision::Delay => {
                    debug!("⏳ Delaying frame {} at audio {}", next_ts, audio_now);
                    self.monitor.record_delay();
                    self.emit(WorkerEvent::Delayed {
                        media_type: self.media_type,
                        timestamp_us: next_ts,
                    });
                    return Retrieved::Delayed;
                }
                SyncDecision::Drop => {
                    let bytes = self.buffer.extract_min().map(|unit| unit.byte_len()).unwrap_or(0);
                    debug!("🗑️ Dropping late frame {} at audio {}", next_ts, audio_now);
                    self.monitor.record_drop(bytes);
                    self.emit(WorkerEvent::Dropped {
                        media_type: self.media_type,
                        timestamp_us: next_ts,
                        reason: DropReason::Late,
                    });
                    dropped_any = true;
                    self.evaluate_adaptation();
                }
                SyncDecision::Render => {
                    return match self.buffer.extract_min() {
                        Some(unit) => {
                            self.monitor.record_rendered();
                            Retrieved::Unit(unit)
                        }
                        None => Retrieved::Empty,
                    };
                }
            }
        }
    }

    fn finish_warm_up(&mut self) {
        self.buffered = true;
        self.drain_start_size = self.buffer.size().max(1);
        info!(
            "✅ {} buffered with {} units, draining",
            self.media_type,
            self.buffer.size()
        );
        self.emit(WorkerEvent::Buffered {
            media_type: self.media_type,
            buffer_size: self.buffer.size(),
        });
        self.evaluate_adaptation();
    }

    fn reset(&mut self, tier: RateTier) -> MediaResult<()> {
        self.decoder.close();
        let abandoned = self.in_flight.len();
        self.in_flight.clear();
        let discarded = self.buffer.size();
        self.buffer.clear();

        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        self.decoded_rx = decoded_rx;
        self.decoder = self
            .factory
            .create(self.media_type, decoded_tx, self.pool.clone())?;

        self.generation += 1;
        self.tier = tier;
        self.seen_key = false;
        self.warm_up_at = None;
        self.buffered = false;
        self.drain_start_size = 0;
        self.up_signalled = false;
        if tier == RateTier::Normal {
            self.rate_adapted = false;
            self.sync.tighten();
        }

        info!(
            "🔄 {} worker reset to {:?} tier (generation {}, discarded {} units, abandoned {} decodes)",
            self.media_type, tier, self.generation, discarded, abandoned
        );
        Ok(())
    }

    fn evaluate_adaptation(&mut self) {
        if let Some(signal) = self.monitor.check_down(self.buffered) {
            if !self.rate_adapted {
                self.rate_adapted = true;
                self.sync.relax();
            }
            self.emit(WorkerEvent::Adaptation {
                media_type: self.media_type,
                signal,
            });
        }
    }

    fn check_adapt_up(&mut self) {
        if self.up_signalled || !self.buffered {
            return;
        }
        if self
            .monitor
            .should_adapt_up(self.tier, self.buffer.size(), self.drain_start_size)
        {
            self.up_signalled = true;
            info!(
                "📈 {} buffer refilled to {} units, adapting up",
                self.media_type,
                self.buffer.size()
            );
            self.emit(WorkerEvent::Adaptation {
                media_type: self.media_type,
                signal: AdaptationSignal::Up,
            });
        }
    }

    fn report_stale(&mut self) {
        debug!("{} buffer underrun", self.media_type);
        self.monitor.record_stale();
        self.emit(WorkerEvent::Stale {
            media_type: self.media_type,
        });
    }

    fn report_decode_error(&mut self, timestamp_us: i64, e: &MediaError) {
        warn!("❌ Failed to decode {} chunk {}: {}", self.media_type, timestamp_us, e);
        self.monitor.record_decode_error();
        self.emit(WorkerEvent::DecodeError {
            media_type: self.media_type,
            timestamp_us,
            message: e.to_string(),
        });
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            media_type: self.media_type,
            generation: self.generation,
            tier: self.tier,
            counters: self.monitor.counters(),
            buffer_size: self.buffer.size(),
            in_flight: self.in_flight.len(),
            buffered: self.buffered,
            rate_adapted: self.rate_adapted,
            jitter_ms: self.monitor.jitter_ms(),
            drop_ratio: self.monitor.drop_ratio(),
            bitrate_bps: self.monitor.bitrate_bps(Instant::now()),
            pool_outstanding: self.pool.outstanding(),
            sync: self.sync.state(),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine; the worker keeps serving commands.
        let _ = self.events.send(event);
    }
}
