//! Integration tests for loopback sessions and chunk demultiplexing
//!
//! Publishes framed chunks through a loopback session and checks that the
//! subscriber side reassembles them regardless of how receive events split
//! the byte stream.

use bytes::{Bytes, BytesMut};
use moqplay_core::*;
use tokio_test::{assert_err, assert_ok};

fn framed(chunks: &[EncodedChunk]) -> Bytes {
    let mut buf = BytesMut::new();
    for chunk in chunks {
        ChunkWireFormat::encode_framed(chunk, &mut buf).unwrap();
    }
    buf.freeze()
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_loopback_session_starts_active() {
    let session = LoopbackSession::new();
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_subscription_ids_are_unique() {
    let session = LoopbackSession::new();
    let track = TrackNamespace::new("live.example.com/channel-1", "hd");
    session.announce(track.clone());

    let first = session.subscribe(track.clone()).await.unwrap();
    let second = session.subscribe(track.clone()).await.unwrap();

    assert_ne!(first.handle.id, second.handle.id);
    assert_eq!(first.handle.track, track);
    assert_eq!(session.subscriber_count(&track), 2);
}

#[tokio::test]
async fn test_unsubscribe_unknown_track() {
    let session = LoopbackSession::new();
    let handle = SubscriptionHandle {
        id: 42,
        track: TrackNamespace::new("live", "nope"),
    };

    let err = assert_err!(session.unsubscribe(&handle).await);
    assert_eq!(err.error_code(), "TRACK_NOT_FOUND");
}

#[tokio::test]
async fn test_session_is_usable_as_trait_object() {
    let session: std::sync::Arc<dyn MediaSession> = std::sync::Arc::new(LoopbackSession::new());
    assert_eq!(session.state(), SessionState::Active);
    assert!(session
        .subscribe(TrackNamespace::new("live", "audio"))
        .await
        .is_err());
}

// ============================================================================
// Delivery and reassembly
// ============================================================================

#[tokio::test]
async fn test_framed_chunks_survive_arbitrary_splits() {
    let session = LoopbackSession::new();
    let track = TrackNamespace::new("live", "audio");
    let publisher = session.announce(track.clone());
    let mut subscription = session.subscribe(track).await.unwrap();

    let chunks: Vec<EncodedChunk> = (0..5)
        .map(|i| EncodedChunk::audio(i * 20_000, 20_000, vec![i as u8; 17 + i as usize]))
        .collect();
    let stream = framed(&chunks);

    // Deliver in uneven slices that cut through headers and payloads.
    let mut offset = 0;
    for step in [1usize, 3, 11, 2, 29, 7].iter().cycle() {
        if offset >= stream.len() {
            break;
        }
        let end = (offset + step).min(stream.len());
        publisher.send(stream.slice(offset..end));
        offset = end;
    }
    drop(publisher);

    let mut demuxer = ChunkDemuxer::new();
    let mut received = Vec::new();
    while received.len() < chunks.len() {
        let data = subscription.receiver.recv().await.unwrap();
        let (decoded, errors) = demuxer.feed(&data);
        assert!(errors.is_empty());
        received.extend(decoded);
    }

    assert_eq!(received, chunks);
    assert_eq!(demuxer.buffered_bytes(), 0);
    assert_eq!(demuxer.chunks_decoded(), 5);
}

#[tokio::test]
async fn test_send_chunk_delivers_one_event() {
    let session = LoopbackSession::new();
    let track = TrackNamespace::new("live", "hd");
    let publisher = session.announce(track.clone());
    let mut subscription = session.subscribe(track).await.unwrap();

    let chunk = EncodedChunk::video(true, 0, vec![0xAA; 64]);
    assert_eq!(assert_ok!(publisher.send_chunk(&chunk)), 1);

    let data = subscription.receiver.recv().await.unwrap();
    let mut demuxer = ChunkDemuxer::new();
    let (decoded, errors) = demuxer.feed(&data);
    assert!(errors.is_empty());
    assert_eq!(decoded, vec![chunk]);
}

#[tokio::test]
async fn test_corrupt_chunk_between_valid_ones() {
    let good_a = EncodedChunk::video(true, 0, vec![1; 8]);
    let good_b = EncodedChunk::video(false, 33_333, vec![2; 8]);

    let mut buf = BytesMut::new();
    ChunkWireFormat::encode_framed(&good_a, &mut buf).unwrap();
    // Frame a body whose media tag is unknown.
    let mut bad_body = BytesMut::new();
    ChunkWireFormat::encode_chunk(&good_a, &mut bad_body);
    bad_body[0] = 9;
    ChunkWireFormat::encode_varint(bad_body.len() as u64, &mut buf).unwrap();
    buf.extend_from_slice(&bad_body);
    ChunkWireFormat::encode_framed(&good_b, &mut buf).unwrap();

    let mut demuxer = ChunkDemuxer::new();
    let (decoded, errors) = demuxer.feed(&buf);

    assert_eq!(decoded, vec![good_a, good_b]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PlayoutError::InvalidMediaType { tag: 9 }));
    assert_eq!(demuxer.chunks_rejected(), 1);
}
