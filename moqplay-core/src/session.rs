//! Media session abstraction and in-process loopback session
//!
//! The player consumes a pub/sub session: it subscribes to a
//! `(namespace, track name)` pair and receives the track's byte stream as a
//! sequence of receive events. [`LoopbackSession`] is an in-process
//! implementation where the publishing side lives in the same process, used
//! by tools and tests.

use crate::chunk::EncodedChunk;
use crate::error::PlayoutError;
use crate::wire::ChunkWireFormat;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Track namespace following MoQ naming
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackNamespace {
    /// Namespace (e.g., "live.example.com/channel-1")
    pub namespace: String,
    /// Track name (e.g., "hd", "audio")
    pub track_name: String,
}

impl TrackNamespace {
    /// Create a track namespace
    pub fn new(namespace: impl Into<String>, track_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            track_name: track_name.into(),
        }
    }
}

impl std::fmt::Display for TrackNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.track_name)
    }
}

/// Identity of one live subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Session-unique subscription id
    pub id: u64,
    /// Subscribed track
    pub track: TrackNamespace,
}

/// An active subscription and its byte stream
#[derive(Debug)]
pub struct Subscription {
    /// Identity used for unsubscribe and for discarding stale deliveries
    pub handle: SubscriptionHandle,
    /// Receive events, in delivery order, with no chunk-boundary alignment
    pub receiver: mpsc::UnboundedReceiver<Bytes>,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is active and ready for track operations
    Active,
    /// Session has been terminated
    Terminated,
}

/// Transport session consumed by the player
#[async_trait]
pub trait MediaSession: Send + Sync + std::fmt::Debug {
    /// Subscribe to a track; the returned stream stays open until unsubscribe
    async fn subscribe(&self, track: TrackNamespace) -> Result<Subscription, PlayoutError>;

    /// End a subscription. Unknown handles are an error.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), PlayoutError>;

    /// Current session state
    fn state(&self) -> SessionState;
}

#[derive(Debug, Default)]
struct PublishedTrack {
    subscribers: Vec<(u64, mpsc::UnboundedSender<Bytes>)>,
    pending_failures: Vec<String>,
}

#[derive(Debug)]
struct LoopbackInner {
    state: RwLock<SessionState>,
    tracks: DashMap<TrackNamespace, PublishedTrack>,
    next_subscription_id: AtomicU64,
}

/// In-process session where publishers and subscribers share one process
#[derive(Debug, Clone)]
pub struct LoopbackSession {
    inner: Arc<LoopbackInner>,
}

impl LoopbackSession {
    /// Create an active session with no announced tracks
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                state: RwLock::new(SessionState::Active),
                tracks: DashMap::new(),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    /// Announce a track and get a handle for publishing on it
    pub fn announce(&self, track: TrackNamespace) -> TrackPublisher {
        info!("📢 Announcing track {}", track);
        self.inner.tracks.entry(track.clone()).or_default();
        TrackPublisher {
            track,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Make the next subscribe call for `track` fail with `reason`
    pub fn fail_next_subscribe(&self, track: &TrackNamespace, reason: &str) {
        if let Some(mut entry) = self.inner.tracks.get_mut(track) {
            entry.pending_failures.push(reason.to_string());
        }
    }

    /// Number of live subscriptions on a track
    pub fn subscriber_count(&self, track: &TrackNamespace) -> usize {
        self.inner
            .tracks
            .get(track)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Terminate the session, closing every subscription stream
    pub fn terminate(&self) {
        let mut state = self.inner.state.write();
        if *state == SessionState::Terminated {
            return;
        }
        *state = SessionState::Terminated;
        for mut entry in self.inner.tracks.iter_mut() {
            entry.subscribers.clear();
        }
        info!("Loopback session terminated");
    }

    fn ensure_active(&self) -> Result<(), PlayoutError> {
        match *self.inner.state.read() {
            SessionState::Active => Ok(()),
            SessionState::Terminated => Err(PlayoutError::SessionClosed),
        }
    }
}

impl Default for LoopbackSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    async fn subscribe(&self, track: TrackNamespace) -> Result<Subscription, PlayoutError> {
        self.ensure_active()?;

        let mut entry = match self.inner.tracks.get_mut(&track) {
            Some(entry) => entry,
            None => {
                return Err(PlayoutError::SubscriptionFailed {
                    track_namespace: track.to_string(),
                    code: 4,
                    reason: "Track not found".to_string(),
                })
            }
        };

        if !entry.pending_failures.is_empty() {
            let reason = entry.pending_failures.remove(0);
            warn!("Subscription to {} rejected: {}", track, reason);
            return Err(PlayoutError::SubscriptionFailed {
                track_namespace: track.to_string(),
                code: 5,
                reason,
            });
        }

        let id = self
            .inner
            .next_subscription_id
            .fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        entry.subscribers.push((id, sender));
        debug!("🔔 Subscribed to {} with subscription id {}", track, id);

        Ok(Subscription {
            handle: SubscriptionHandle { id, track },
            receiver,
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), PlayoutError> {
        self.ensure_active()?;

        let mut entry = self.inner.tracks.get_mut(&handle.track).ok_or_else(|| {
            PlayoutError::TrackNotFound {
                track_namespace: handle.track.to_string(),
            }
        })?;

        let before = entry.subscribers.len();
        entry.subscribers.retain(|(id, _)| *id != handle.id);
        if entry.subscribers.len() == before {
            return Err(PlayoutError::SubscriptionNotFound {
                subscription_id: handle.id,
            });
        }

        debug!("🔕 Unsubscribed {} (id {})", handle.track, handle.id);
        Ok(())
    }

    fn state(&self) -> SessionState {
        *self.inner.state.read()
    }
}

/// Publishing side of one loopback track
#[derive(Debug, Clone)]
pub struct TrackPublisher {
    track: TrackNamespace,
    inner: Arc<LoopbackInner>,
}

impl TrackPublisher {
    /// Track this publisher writes to
    pub fn track(&self) -> &TrackNamespace {
        &self.track
    }

    /// Deliver raw bytes to every current subscriber as one receive event.
    ///
    /// Returns the number of subscribers reached.
    pub fn send(&self, data: Bytes) -> usize {
        let Some(mut entry) = self.inner.tracks.get_mut(&self.track) else {
            return 0;
        };
        entry
            .subscribers
            .retain(|(_, sender)| sender.send(data.clone()).is_ok());
        entry.subscribers.len()
    }

    /// Frame and deliver a chunk as one receive event
    pub fn send_chunk(&self, chunk: &EncodedChunk) -> Result<usize, PlayoutError> {
        let mut buf = BytesMut::new();
        ChunkWireFormat::encode_framed(chunk, &mut buf)?;
        Ok(self.send(buf.freeze()))
    }
}
