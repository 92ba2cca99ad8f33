//! Player events

use crate::ladder::VideoState;
use moqplay_core::MediaType;
use moqplay_media::{AdaptationSignal, DropReason, WorkerEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Events observable while the player runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// A track finished warming up and started draining
    Buffered {
        /// Track
        media_type: MediaType,
        /// Units buffered at that moment
        buffer_size: usize,
    },
    /// A track asked for a rate change
    AdaptationSignalled {
        /// Track
        media_type: MediaType,
        /// Requested direction
        signal: AdaptationSignal,
    },
    /// The video subscription moved to another ladder entry
    TrackSwitched {
        /// Previous state, if video was live
        from: Option<VideoState>,
        /// New state
        to: VideoState,
        /// Track now subscribed
        track_name: String,
        /// The requested resolution failed and the other one is used
        fell_back: bool,
    },
    /// A video switch failed on both resolutions
    TrackSwitchFailed {
        /// Requested state
        target: VideoState,
        /// Failure description
        message: String,
    },
    /// A unit was dropped
    Dropped {
        /// Track
        media_type: MediaType,
        /// Unit timestamp
        timestamp_us: i64,
        /// Why
        reason: DropReason,
    },
    /// A video unit was held back for being early
    Delayed {
        /// Unit timestamp
        timestamp_us: i64,
    },
    /// A track ran out of units while draining
    Underrun {
        /// Track
        media_type: MediaType,
    },
    /// A chunk failed to decode and was skipped
    DecodeError {
        /// Track
        media_type: MediaType,
        /// Chunk timestamp
        timestamp_us: i64,
        /// Failure description
        message: String,
    },
    /// A track worker stopped after a fatal error
    WorkerFailed {
        /// Track
        media_type: MediaType,
        /// Failure description
        message: String,
    },
}

impl PlayerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::Buffered { .. } => "buffered",
            PlayerEvent::AdaptationSignalled { .. } => "adaptation_signalled",
            PlayerEvent::TrackSwitched { .. } => "track_switched",
            PlayerEvent::TrackSwitchFailed { .. } => "track_switch_failed",
            PlayerEvent::Dropped { .. } => "dropped",
            PlayerEvent::Delayed { .. } => "delayed",
            PlayerEvent::Underrun { .. } => "underrun",
            PlayerEvent::DecodeError { .. } => "decode_error",
            PlayerEvent::WorkerFailed { .. } => "worker_failed",
        }
    }

    /// Check if this is an adaptation or ladder event
    pub fn is_adaptation_event(&self) -> bool {
        matches!(
            self,
            PlayerEvent::AdaptationSignalled { .. }
                | PlayerEvent::TrackSwitched { .. }
                | PlayerEvent::TrackSwitchFailed { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            PlayerEvent::TrackSwitchFailed { .. }
                | PlayerEvent::DecodeError { .. }
                | PlayerEvent::WorkerFailed { .. }
        )
    }
}

impl From<WorkerEvent> for PlayerEvent {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Buffered {
                media_type,
                buffer_size,
            } => PlayerEvent::Buffered {
                media_type,
                buffer_size,
            },
            WorkerEvent::Adaptation { media_type, signal } => {
                PlayerEvent::AdaptationSignalled { media_type, signal }
            }
            WorkerEvent::Dropped {
                media_type,
                timestamp_us,
                reason,
            } => PlayerEvent::Dropped {
                media_type,
                timestamp_us,
                reason,
            },
            WorkerEvent::Delayed { timestamp_us, .. } => PlayerEvent::Delayed { timestamp_us },
            WorkerEvent::Stale { media_type } => PlayerEvent::Underrun { media_type },
            WorkerEvent::DecodeError {
                media_type,
                timestamp_us,
                message,
            } => PlayerEvent::DecodeError {
                media_type,
                timestamp_us,
                message,
            },
            WorkerEvent::Failed {
                media_type,
                message,
            } => PlayerEvent::WorkerFailed {
                media_type,
                message,
            },
        }
    }
}

/// Stream of player events
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<PlayerEvent>,
    closed: bool,
}

impl EventStream {
    /// Create a new event stream
    pub fn new(receiver: mpsc::UnboundedReceiver<PlayerEvent>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    /// Wait for the next event; `None` once the player has stopped
    pub async fn next(&mut self) -> Option<PlayerEvent> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// Wait for the next event matching `predicate`, skipping the rest
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> Option<PlayerEvent>
    where
        F: FnMut(&PlayerEvent) -> bool,
    {
        while let Some(event) = self.next().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Try to get the next event without waiting
    pub fn try_next(&mut self) -> Result<Option<PlayerEvent>, mpsc::error::TryRecvError> {
        if self.closed {
            return Err(mpsc::error::TryRecvError::Disconnected);
        }
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Close the event stream
    pub fn close(&mut self) {
        debug!("Closing player event stream");
        self.closed = true;
        self.receiver.close();
    }

    /// Check if the stream is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_event_mapping() {
        let event = PlayerEvent::from(WorkerEvent::Stale {
            media_type: MediaType::Audio,
        });
        assert_eq!(
            event,
            PlayerEvent::Underrun {
                media_type: MediaType::Audio
            }
        );
        assert_eq!(event.event_type(), "underrun");

        let event = PlayerEvent::from(WorkerEvent::Adaptation {
            media_type: MediaType::Video,
            signal: AdaptationSignal::Down,
        });
        assert!(event.is_adaptation_event());
        assert!(!event.is_error_event());
    }

    #[test]
    fn test_event_json() {
        let event = PlayerEvent::TrackSwitched {
            from: Some(VideoState::NormalHd),
            to: VideoState::ReducedHd,
            track_name: "hd-reduced".to_string(),
            fell_back: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"track_switched\""));
        assert!(json.contains("\"to\":\"reduced_hd\""));
    }

    #[tokio::test]
    async fn test_event_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx);
        assert_eq!(stream.try_next().unwrap(), None);

        tx.send(PlayerEvent::Delayed { timestamp_us: 1 }).unwrap();
        tx.send(PlayerEvent::Underrun {
            media_type: MediaType::Video,
        })
        .unwrap();

        let event = stream
            .next_matching(|e| e.event_type() == "underrun")
            .await
            .unwrap();
        assert_eq!(event.event_type(), "underrun");

        stream.close();
        assert!(stream.is_closed());
        assert!(stream.next().await.is_none());
    }
}
