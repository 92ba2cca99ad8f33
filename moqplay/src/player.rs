//! Playout pipeline wiring
//!
//! A [`Player`] owns one decode worker per track, a reader task per live
//! subscription and a pacer task. Readers demultiplex subscription bytes
//! into chunks and feed the matching worker. The pacer pulls audio once the
//! audio worker has warmed up, hands each slice to the [`RenderSink`] and,
//! when the slice has played, asks the video worker for the frame that
//! matches the audio position before pulling the next slice.

use crate::catalog::Catalog;
use crate::config::PlayerConfig;
use crate::error::{PlayerError, PlayerResult};
use crate::event::{EventStream, PlayerEvent};
use crate::ladder::{LadderSnapshot, SharedLadder, SwitchOutcome, TrackSwitchCoordinator};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, OptionFuture};
use moqplay_core::{ChunkDemuxer, EncodedChunk, MediaSession, MediaType, Subscription};
use moqplay_diagnostics::{ConditionReport, PlayoutProfiler};
use moqplay_media::{
    AdaptationSignal, DecodedUnit, DecoderFactory, MediaError, PassthroughDecoderFactory,
    Retrieved, SyncState, TrackWorker, TrackWorkerHandle, WorkerEvent, WorkerStats,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Receives decoded units for presentation
#[async_trait]
pub trait RenderSink: Send + Sync {
    /// Present a video frame. Called at most once per audio slice.
    async fn on_frame_ready(&self, unit: DecodedUnit);

    /// Play an audio slice. Returning signals that the slice has finished
    /// playing, which paces both tracks.
    async fn on_audio_ready(&self, unit: DecodedUnit);
}

/// Builder for [`Player`]
pub struct PlayerBuilder {
    session: Arc<dyn MediaSession>,
    sink: Arc<dyn RenderSink>,
    config: PlayerConfig,
    factory: Arc<dyn DecoderFactory>,
    catalog: Option<Catalog>,
}

impl PlayerBuilder {
    /// Set the player configuration
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Decoders to use for both tracks
    pub fn decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Restrict the ladder to tracks listed in `catalog`
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Start the workers and subscribe the initial ladder entries.
    ///
    /// Only failures to set up the tracks are returned; everything after
    /// that is reported through the event stream.
    pub async fn start(self) -> PlayerResult<Player> {
        self.config.validate()?;
        let ladder_config = self.config.ladder.clone();

        let mut coordinator = TrackSwitchCoordinator::new(self.session.clone(), ladder_config.clone());
        if let Some(catalog) = &self.catalog {
            catalog.check_ladder(&ladder_config)?;
            coordinator = coordinator
                .with_available_tracks(catalog.video_track_names(&ladder_config.audio_track));
        }

        let (audio, audio_events) = self.spawn_worker(MediaType::Audio)?;
        let (video, video_events) = match self.spawn_worker(MediaType::Video) {
            Ok(worker) => worker,
            Err(e) => {
                audio.shutdown();
                return Err(e.into());
            }
        };

        let subscriptions = async {
            let audio_sub = coordinator.subscribe_audio().await?;
            let video_start = coordinator.start_video().await?;
            Ok::<_, PlayerError>((audio_sub, video_start))
        }
        .await;
        let (audio_sub, video_start) = match subscriptions {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("❌ Failed to subscribe ladder tracks: {}", e);
                coordinator.close().await;
                audio.shutdown();
                video.shutdown();
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        let ladder = coordinator.ladder();
        let readers = TrackReaders {
            ladder: Arc::clone(&ladder),
            sync_refs: Arc::new(Mutex::new(SyncState::default())),
            audio: audio.clone(),
            video: video.clone(),
        };
        let mut reader_tasks = vec![readers.spawn(audio_sub)];
        reader_tasks.push(readers.spawn(video_start.subscription));

        let mut profiler = PlayoutProfiler::new(
            self.config
                .profiler_interval()
                .unwrap_or(Duration::from_secs(1)),
        );
        profiler.watch(audio.clone());
        profiler.watch(video.clone());
        let profiler_task = self
            .config
            .profiler_interval()
            .map(|_| profiler.clone().start(None));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(PlayerEvent::TrackSwitched {
            from: None,
            to: video_start.state,
            track_name: video_start.track_name.clone(),
            fell_back: video_start.fell_back,
        });

        let pacer = PlayoutPacer {
            coordinator,
            readers,
            reader_tasks,
            sink: self.sink,
            commands: command_rx,
            audio_events,
            video_events,
            events: event_tx,
            playing: None,
            audio_started: false,
            retry_at: None,
            audio_retry: self.config.audio_retry(),
        };
        let pacer = tokio::spawn(pacer.run());

        info!(
            "▶️ Player {} started on {} with video {}",
            id, ladder_config.namespace, video_start.track_name
        );

        Ok(Player {
            id,
            commands: command_tx,
            events: Some(event_rx),
            ladder,
            audio,
            video,
            profiler,
            profiler_task,
            pacer: Some(pacer),
        })
    }

    fn spawn_worker(
        &self,
        media_type: MediaType,
    ) -> Result<(TrackWorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>), MediaError> {
        TrackWorker::builder(media_type, Arc::clone(&self.factory))
            .config(self.config.worker.clone())
            .sync(self.config.sync.clone())
            .rate_monitor(self.config.rate_monitor.clone())
            .spawn()
    }
}

#[derive(Debug)]
enum PlayerCommand {
    SelectTrack {
        name: String,
        reply: oneshot::Sender<PlayerResult<LadderSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Adaptive audio/video player
#[derive(Debug)]
pub struct Player {
    id: Uuid,
    commands: mpsc::UnboundedSender<PlayerCommand>,
    events: Option<mpsc::UnboundedReceiver<PlayerEvent>>,
    ladder: SharedLadder,
    audio: TrackWorkerHandle,
    video: TrackWorkerHandle,
    profiler: PlayoutProfiler,
    profiler_task: Option<JoinHandle<()>>,
    pacer: Option<JoinHandle<()>>,
}

impl Player {
    /// Start building a player reading from `session` and presenting to `sink`
    pub fn builder(session: Arc<dyn MediaSession>, sink: Arc<dyn RenderSink>) -> PlayerBuilder {
        PlayerBuilder {
            session,
            sink,
            config: PlayerConfig::default(),
            factory: Arc::new(PassthroughDecoderFactory::default()),
            catalog: None,
        }
    }

    /// Player id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take the event stream. Only the first call returns it.
    pub fn events(&mut self) -> Option<EventStream> {
        self.events.take().map(EventStream::new)
    }

    /// Current ladder selection
    pub fn ladder_state(&self) -> LadderSnapshot {
        self.ladder.read().snapshot()
    }

    /// Switch video to the resolution of `name`, keeping the rate tier
    pub async fn select_track(&self, name: impl Into<String>) -> PlayerResult<LadderSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(PlayerCommand::SelectTrack {
                name: name.into(),
                reply,
            })
            .map_err(|_| PlayerError::Closed)?;
        response.await.map_err(|_| PlayerError::Closed)?
    }

    /// Stats snapshot from one track worker
    pub async fn stats(&self, media_type: MediaType) -> PlayerResult<WorkerStats> {
        let worker = match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        };
        Ok(worker.stats().await?)
    }

    /// Condition report across both tracks
    pub async fn conditions(&self) -> ConditionReport {
        self.profiler.snapshot().await
    }

    /// Whether the pacer is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop playback, release every subscription and stop the workers
    pub async fn shutdown(mut self) -> PlayerResult<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(PlayerCommand::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
        if let Some(pacer) = self.pacer.take() {
            let _ = pacer.await;
        }
        if let Some(task) = self.profiler_task.take() {
            task.abort();
        }
        info!("⏹️ Player {} stopped", self.id);
        Ok(())
    }
}

/// Spawns the tasks that move subscription bytes into the workers
#[derive(Debug, Clone)]
struct TrackReaders {
    ladder: SharedLadder,
    sync_refs: Arc<Mutex<SyncState>>,
    audio: TrackWorkerHandle,
    video: TrackWorkerHandle,
}

impl TrackReaders {
    fn spawn(&self, subscription: Subscription) -> JoinHandle<()> {
        let readers = self.clone();
        tokio::spawn(readers.run(subscription))
    }

    async fn run(self, mut subscription: Subscription) {
        let handle = subscription.handle.clone();
        let mut demuxer = ChunkDemuxer::new();
        debug!("📥 Reading {} (subscription {})", handle.track, handle.id);

        while let Some(data) = subscription.receiver.recv().await {
            // Held while forwarding so a switch cannot reset the worker mid-delivery
            let ladder = self.ladder.read();
            if !ladder.is_current(&handle) {
                debug!("Subscription {} retired, discarding its deliveries", handle.id);
                break;
            }

            let (chunks, errors) = demuxer.feed(&data);
            for e in errors {
                warn!("Discarding malformed data on {}: {}", handle.track, e);
            }
            for chunk in chunks {
                if !self.forward(chunk) {
                    return;
                }
            }
        }

        debug!(
            "Reader for {} finished after {} chunks",
            handle.track,
            demuxer.chunks_decoded()
        );
    }

    /// Returns false once the target worker is gone
    fn forward(&self, chunk: EncodedChunk) -> bool {
        let media_type = chunk.media_type;
        let first = {
            let mut refs = self.sync_refs.lock();
            match media_type {
                MediaType::Video => refs.set_video_ref(chunk.timestamp_us),
                MediaType::Audio => refs.set_audio_ref(chunk.timestamp_us),
            }
        };
        if first {
            if let Err(e) = self.video.set_sync_ref(media_type, chunk.timestamp_us) {
                warn!("Could not set {} sync reference: {}", media_type, e);
            }
        }

        let worker = match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        };
        match worker.insert(chunk) {
            Ok(()) => true,
            Err(MediaError::WorkerClosed { .. }) => false,
            Err(e) => {
                warn!("Rejected {} chunk: {}", media_type, e);
                true
            }
        }
    }
}

struct PlayoutPacer {
    coordinator: TrackSwitchCoordinator,
    readers: TrackReaders,
    reader_tasks: Vec<JoinHandle<()>>,
    sink: Arc<dyn RenderSink>,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    audio_events: mpsc::UnboundedReceiver<WorkerEvent>,
    video_events: mpsc::UnboundedReceiver<WorkerEvent>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    playing: Option<BoxFuture<'static, i64>>,
    audio_started: bool,
    retry_at: Option<Instant>,
    audio_retry: Duration,
}

impl PlayoutPacer {
    async fn run(mut self) {
        let mut shutdown_reply = None;
        loop {
            let retry_pending = self.playing.is_none() && self.retry_at.is_some();
            let retry_at = self.retry_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(PlayerCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(PlayerCommand::SelectTrack { name, reply }) => {
                        let result = self.select_track(&name).await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },

                Some(event) = self.video_events.recv() => {
                    self.handle_worker_event(event).await;
                }

                Some(event) = self.audio_events.recv() => {
                    self.handle_worker_event(event).await;
                }

                Some(audio_ts) = OptionFuture::from(self.playing.as_mut()), if self.playing.is_some() => {
                    self.playing = None;
                    self.render_video(audio_ts).await;
                    self.pull_audio().await;
                }

                _ = tokio::time::sleep_until(retry_at), if retry_pending => {
                    self.retry_at = None;
                    self.pull_audio().await;
                }
            }
        }

        self.playing = None;
        self.coordinator.close().await;
        for task in self.reader_tasks.drain(..) {
            task.abort();
        }
        self.readers.audio.shutdown();
        self.readers.video.shutdown();
        debug!("Playout pacer stopped");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        let adaptation = match &event {
            WorkerEvent::Adaptation {
                media_type: MediaType::Video,
                signal,
            } => Some(*signal),
            WorkerEvent::Adaptation {
                media_type: MediaType::Audio,
                signal,
            } => {
                debug!("Audio ladder is fixed, ignoring {:?} signal", signal);
                None
            }
            WorkerEvent::Failed { media_type, message } => {
                error!("❌ {} worker failed: {}", media_type, message);
                None
            }
            _ => None,
        };
        let start_audio = !self.audio_started
            && matches!(
                event,
                WorkerEvent::Buffered {
                    media_type: MediaType::Audio,
                    ..
                }
            );

        self.emit(event.into());

        if start_audio {
            self.audio_started = true;
            self.pull_audio().await;
        }
        if let Some(signal) = adaptation {
            self.adapt(signal).await;
        }
    }

    async fn pull_audio(&mut self) {
        match self.readers.audio.retrieve(None).await {
            Ok(Retrieved::Unit(unit)) => {
                let audio_ts = unit.timestamp_us;
                let sink = Arc::clone(&self.sink);
                self.playing = Some(
                    async move {
                        sink.on_audio_ready(unit).await;
                        audio_ts
                    }
                    .boxed(),
                );
            }
            Ok(Retrieved::Buffering) => self.audio_started = false,
            Ok(_) => self.retry_at = Some(Instant::now() + self.audio_retry),
            Err(e) => warn!("Audio playback stopped: {}", e),
        }
    }

    async fn render_video(&mut self, audio_ts: i64) {
        match self.readers.video.retrieve(Some(audio_ts)).await {
            Ok(Retrieved::Unit(unit)) => self.sink.on_frame_ready(unit).await,
            Ok(_) => {}
            Err(e) => debug!("No video at audio {}: {}", audio_ts, e),
        }
    }

    async fn adapt(&mut self, signal: AdaptationSignal) {
        let Some(target) = self
            .coordinator
            .video_state()
            .map(|state| state.on_signal(signal))
        else {
            warn!("Ignoring {:?} signal without a video subscription", signal);
            return;
        };

        match self.coordinator.apply_signal(signal).await {
            Ok(Some(outcome)) => self.activate(outcome).await,
            Ok(None) => {}
            Err(e) => {
                error!("❌ Rate switch to {:?} failed: {}", target, e);
                self.emit(PlayerEvent::TrackSwitchFailed {
                    target,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn select_track(&mut self, name: &str) -> PlayerResult<LadderSnapshot> {
        if name == self.coordinator.config().audio_track {
            return Err(PlayerError::NotVideoTrack {
                name: name.to_string(),
            });
        }

        match self.coordinator.select_track(name).await {
            Ok(Some(outcome)) => {
                self.activate(outcome).await;
                Ok(self.coordinator.snapshot())
            }
            Ok(None) => Ok(self.coordinator.snapshot()),
            Err(e) => {
                if let Some(target) = self.coordinator.config().state_for(name) {
                    if self.coordinator.video_state().is_none() {
                        self.emit(PlayerEvent::TrackSwitchFailed {
                            target,
                            message: e.to_string(),
                        });
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn activate(&mut self, outcome: SwitchOutcome) {
        if let Err(e) = self.readers.video.reset(outcome.state.tier()).await {
            error!("❌ Video worker could not restart for {}: {}", outcome.track_name, e);
        }

        self.reader_tasks.retain(|task| !task.is_finished());
        self.reader_tasks.push(self.readers.spawn(outcome.subscription));

        self.emit(PlayerEvent::TrackSwitched {
            from: outcome.previous,
            to: outcome.state,
            track_name: outcome.track_name,
            fell_back: outcome.fell_back,
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}
