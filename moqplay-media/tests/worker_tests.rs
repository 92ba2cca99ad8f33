//! Integration tests for track decode workers
//!
//! Workers run on tokio's paused clock so warm-up timing is deterministic.
//! A `stats()` round trip acts as a barrier: commands are handled in order
//! and inline decoder outputs are drained before the next command.

use moqplay_core::{EncodedChunk, MediaType};
use moqplay_media::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const T: i64 = 33_333;

// ============================================================================
// Test decoders
// ============================================================================

#[derive(Debug, Default)]
struct CountingFactory {
    submissions: Arc<AtomicUsize>,
    creations: AtomicUsize,
    fail_after: Option<usize>,
}

impl CountingFactory {
    fn failing_after(creations: usize) -> Self {
        Self {
            fail_after: Some(creations),
            ..Default::default()
        }
    }

    fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for CountingFactory {
    fn create(
        &self,
        media_type: MediaType,
        output: DecoderOutput,
        pool: FramePool,
    ) -> MediaResult<Box<dyn ChunkDecoder>> {
        let created = self.creations.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.fail_after, Some(limit) if created > limit) {
            return Err(MediaError::CodecInitializationFailed {
                codec: "counting".to_string(),
                reason: "hardware decoder unavailable".to_string(),
            });
        }
        let codec = match media_type {
            MediaType::Video => PassthroughCodec::video(4, 4),
            MediaType::Audio => PassthroughCodec::audio(48_000, 2),
        };
        Ok(Box::new(CountingDecoder {
            inner: InlineDecoder::new(codec, output, pool),
            submissions: Arc::clone(&self.submissions),
        }))
    }
}

#[derive(Debug)]
struct CountingDecoder {
    inner: InlineDecoder<PassthroughCodec>,
    submissions: Arc<AtomicUsize>,
}

impl ChunkDecoder for CountingDecoder {
    fn codec_info(&self) -> CodecInfo {
        self.inner.codec_info()
    }

    fn decode(&mut self, request: DecodeRequest) -> MediaResult<()> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if request.payload.first() == Some(&0xFF) {
            return Err(MediaError::DecodingFailed {
                codec: "counting".to_string(),
                reason: "corrupt payload".to_string(),
            });
        }
        self.inner.decode(request)
    }
}

/// Holds requests until `batch` are pending, then completes them newest first
#[derive(Debug)]
struct ReversingFactory {
    batch: usize,
}

impl DecoderFactory for ReversingFactory {
    fn create(
        &self,
        _media_type: MediaType,
        output: DecoderOutput,
        pool: FramePool,
    ) -> MediaResult<Box<dyn ChunkDecoder>> {
        Ok(Box::new(ReversingDecoder {
            codec: PassthroughCodec::video(4, 4),
            output,
            pool,
            pending: Vec::new(),
            batch: self.batch,
        }))
    }
}

#[derive(Debug)]
struct ReversingDecoder {
    codec: PassthroughCodec,
    output: DecoderOutput,
    pool: FramePool,
    pending: Vec<DecodeRequest>,
    batch: usize,
}

impl ChunkDecoder for ReversingDecoder {
    fn codec_info(&self) -> CodecInfo {
        self.codec.codec_info()
    }

    fn decode(&mut self, request: DecodeRequest) -> MediaResult<()> {
        self.pending.push(request);
        if self.pending.len() < self.batch {
            return Ok(());
        }
        while let Some(request) = self.pending.pop() {
            let result = self
                .codec
                .decode_sync(&request, &self.pool)
                .map(|payload| DecodedUnit {
                    timestamp_us: request.timestamp_us,
                    payload,
                });
            let _ = self.output.send(DecodeOutput {
                seq: request.seq,
                timestamp_us: request.timestamp_us,
                result,
            });
        }
        Ok(())
    }
}

fn spawn(
    media_type: MediaType,
    factory: Arc<CountingFactory>,
) -> (TrackWorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>) {
    TrackWorker::builder(media_type, factory).spawn().unwrap()
}

fn key(ts: i64) -> EncodedChunk {
    EncodedChunk::video(true, ts, vec![1u8; 16])
}

fn delta(ts: i64) -> EncodedChunk {
    EncodedChunk::video(false, ts, vec![2u8; 16])
}

fn drain(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn warm_up() {
    tokio::time::sleep(Duration::from_millis(1_100)).await;
}

// ============================================================================
// Key-frame gating and pre-drop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deltas_before_first_key_are_discarded_silently() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Video, factory.clone());

    for ts in [0, T, 2 * T] {
        worker.insert(delta(ts)).unwrap();
    }
    let stats = worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 0);
    assert_eq!(stats.counters.dropped, 0);
    assert_eq!(stats.counters.received, 3);
    assert_eq!(stats.buffer_size, 0);

    worker.insert(key(3 * T)).unwrap();
    worker.insert(delta(4 * T)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 2);
    assert_eq!(stats.counters.decoded, 2);
    assert_eq!(stats.buffer_size, 2);
}

#[tokio::test(start_paused = true)]
async fn test_audio_is_not_key_gated() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Audio, factory.clone());

    worker.insert(EncodedChunk::audio(0, 20_000, vec![0u8; 8])).unwrap();
    worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pre_drop_skips_decoder_and_counts_once() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = spawn(MediaType::Video, factory.clone());

    worker.insert(key(100_000)).unwrap();
    worker.insert(delta(133_333)).unwrap();
    warm_up().await;
    let stats = worker.stats().await.unwrap();
    assert!(stats.buffered);
    assert_eq!(factory.submissions(), 2);
    drain(&mut events);

    worker.insert(delta(50_000)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 2);
    assert_eq!(stats.counters.dropped, 1);
    assert_eq!(stats.counters.dropped_bytes, 16);

    let events = drain(&mut events);
    assert!(events.contains(&WorkerEvent::Dropped {
        media_type: MediaType::Video,
        timestamp_us: 50_000,
        reason: DropReason::PreDecode,
    }));

    // Newer data still reaches the decoder.
    worker.insert(delta(166_666)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 3);
    assert_eq!(stats.counters.dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_insert_into_empty_buffer_while_buffered_is_stale() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = spawn(MediaType::Video, factory);

    worker.insert(key(0)).unwrap();
    warm_up().await;
    assert!(worker.retrieve(None).await.unwrap().into_unit().is_some());
    drain(&mut events);

    worker.insert(delta(T)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.counters.stale, 1);
    assert!(drain(&mut events).contains(&WorkerEvent::Stale {
        media_type: MediaType::Video
    }));
}

#[tokio::test(start_paused = true)]
async fn test_decoder_outputs_in_reverse_submission_order() {
    let factory = Arc::new(ReversingFactory { batch: 3 });
    let (worker, _events) = TrackWorker::builder(MediaType::Video, factory)
        .spawn()
        .unwrap();

    worker.insert(key(0)).unwrap();
    worker.insert(delta(2 * T)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.buffer_size, 0);

    worker.insert(delta(T)).unwrap();
    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.counters.decoded, 3);
    assert_eq!(stats.buffer_size, 3);

    let mut order = Vec::new();
    while let Some(unit) = worker.retrieve(None).await.unwrap().into_unit() {
        order.push(unit.timestamp_us);
    }
    assert_eq!(order, vec![0, T, 2 * T]);
}

// ============================================================================
// Synchronization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sync_render_delay_and_drop() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Video, factory);
    worker.set_sync_ref(MediaType::Audio, 1000).unwrap();
    worker.set_sync_ref(MediaType::Video, 0).unwrap();

    worker.insert(key(900)).unwrap();
    let unit = worker.retrieve(Some(1900)).await.unwrap().into_unit().unwrap();
    assert_eq!(unit.timestamp_us, 900);
    drop(unit);

    // More than one tolerance early: held back, not dropped.
    worker.insert(delta(900 + T + 1)).unwrap();
    assert!(matches!(
        worker.retrieve(Some(1900)).await.unwrap(),
        Retrieved::Delayed
    ));
    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.counters.delayed, 1);
    assert_eq!(stats.counters.dropped, 0);
    assert_eq!(stats.buffer_size, 1);

    // More than one tolerance late: purged, then the early unit is held again.
    worker.insert(delta(900 - T - 1)).unwrap();
    assert!(matches!(
        worker.retrieve(Some(1900)).await.unwrap(),
        Retrieved::Delayed
    ));
    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.counters.dropped, 1);
    assert_eq!(stats.buffer_size, 1);
    assert_eq!(stats.pool_outstanding, 1);
    assert_eq!(stats.sync.base_offset(), Some(1000));
}

#[tokio::test(start_paused = true)]
async fn test_sync_refs_are_kept_from_first_value() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Video, factory);
    worker.set_sync_ref(MediaType::Video, 10).unwrap();
    worker.set_sync_ref(MediaType::Video, 99).unwrap();

    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.sync.video_ref, Some(10));
    assert_eq!(stats.sync.audio_ref, None);
}

// ============================================================================
// Rate adaptation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sustained_late_drops_adapt_down_once() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = spawn(MediaType::Video, factory);
    worker.set_sync_ref(MediaType::Audio, 0).unwrap();
    worker.set_sync_ref(MediaType::Video, 0).unwrap();

    worker.insert(key(0)).unwrap();
    for i in 1..10 {
        worker.insert(delta(i * T)).unwrap();
    }
    warm_up().await;

    // Audio is far ahead: every buffered frame is late.
    assert!(matches!(
        worker.retrieve(Some(10_000_000)).await.unwrap(),
        Retrieved::Stale
    ));
    for i in 10..20 {
        worker.insert(delta(i * T)).unwrap();
    }
    worker.retrieve(Some(20_000_000)).await.unwrap();

    let stats = worker.stats().await.unwrap();
    assert!(stats.drop_ratio > 0.2);
    assert!(stats.rate_adapted);
    assert_eq!(stats.pool_outstanding, 0);

    let downs = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                WorkerEvent::Adaptation {
                    signal: AdaptationSignal::Down,
                    ..
                }
            )
        })
        .count();
    assert_eq!(downs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reduced_tier_adapts_up_after_refill() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = TrackWorker::builder(MediaType::Video, factory)
        .tier(RateTier::Reduced)
        .config(WorkerConfig {
            warm_up_ms: 100,
            ..WorkerConfig::default()
        })
        .spawn()
        .unwrap();

    worker.insert(key(0)).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = worker.stats().await.unwrap();
    assert!(stats.buffered);
    assert_eq!(stats.tier, RateTier::Reduced);

    for i in 1..60 {
        worker.insert(delta(i * T)).unwrap();
    }
    worker.stats().await.unwrap();

    let ups = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                WorkerEvent::Adaptation {
                    signal: AdaptationSignal::Up,
                    ..
                }
            )
        })
        .count();
    assert_eq!(ups, 1);
}

// ============================================================================
// Warm-up, errors and reset
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_audio_first_retrieve_waits_for_warm_up() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = spawn(MediaType::Audio, factory);

    worker.insert(EncodedChunk::audio(0, 20_000, vec![0u8; 8])).unwrap();
    assert!(matches!(
        worker.retrieve(None).await.unwrap(),
        Retrieved::Buffering
    ));

    let event = events.recv().await.unwrap();
    assert_eq!(
        event,
        WorkerEvent::Buffered {
            media_type: MediaType::Audio,
            buffer_size: 1
        }
    );

    let unit = worker.retrieve(None).await.unwrap().into_unit().unwrap();
    assert_eq!(unit.media_type(), MediaType::Audio);
    assert!(matches!(
        worker.retrieve(None).await.unwrap(),
        Retrieved::Stale
    ));
}

#[tokio::test(start_paused = true)]
async fn test_decode_error_is_not_fatal() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, mut events) = spawn(MediaType::Video, factory);

    worker.insert(EncodedChunk::video(true, 0, vec![0xFF; 4])).unwrap();
    worker.insert(key(T)).unwrap();

    let stats = worker.stats().await.unwrap();
    assert_eq!(stats.counters.decode_errors, 1);
    assert_eq!(stats.counters.decoded, 1);
    assert_eq!(stats.in_flight, 0);
    assert!(drain(&mut events)
        .iter()
        .any(|e| e.event_type() == "decode_error"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_buffer_and_keeps_counters() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Video, factory.clone());
    worker.set_sync_ref(MediaType::Video, 0).unwrap();

    worker.insert(key(0)).unwrap();
    worker.insert(delta(T)).unwrap();
    let before = worker.stats().await.unwrap();
    assert_eq!(before.pool_outstanding, 2);

    worker.reset(RateTier::Reduced).await.unwrap();
    let after = worker.stats().await.unwrap();
    assert_eq!(after.generation, before.generation + 1);
    assert_eq!(after.tier, RateTier::Reduced);
    assert_eq!(after.buffer_size, 0);
    assert_eq!(after.pool_outstanding, 0);
    assert_eq!(after.counters.received, 2);
    assert_eq!(after.sync.video_ref, Some(0));
    assert!(!after.buffered);

    // Key gating applies again to the new stream.
    worker.insert(delta(2 * T)).unwrap();
    worker.stats().await.unwrap();
    assert_eq!(factory.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_decoder_init_failure_stops_only_that_worker() {
    let failing = Arc::new(CountingFactory::failing_after(1));
    let (video, mut video_events) = spawn(MediaType::Video, failing);
    let (audio, _audio_events) = spawn(MediaType::Audio, Arc::new(CountingFactory::default()));

    let err = video.reset(RateTier::Normal).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Codec);
    assert!(matches!(
        video_events.recv().await.unwrap(),
        WorkerEvent::Failed { .. }
    ));
    assert!(matches!(
        video.stats().await,
        Err(MediaError::WorkerClosed {
            media_type: MediaType::Video
        })
    ));

    assert!(audio.stats().await.is_ok());
}

#[tokio::test]
async fn test_wrong_media_type_is_rejected() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Audio, factory);
    assert!(matches!(
        worker.insert(key(0)),
        Err(MediaError::InvalidMediaType { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_closes_handle() {
    let factory = Arc::new(CountingFactory::default());
    let (worker, _events) = spawn(MediaType::Video, factory);
    worker.shutdown();
    assert!(matches!(
        worker.retrieve(None).await,
        Err(MediaError::WorkerClosed { .. })
    ));
}
