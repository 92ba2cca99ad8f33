//! Error types for moqplay

use thiserror::Error;

/// Main error type for session, wire and pipeline control operations
#[derive(Error, Debug)]
pub enum PlayoutError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Configuration value out of range or inconsistent
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Session has been terminated
    #[error("Session closed")]
    SessionClosed,

    /// Subscription failed
    #[error("Subscription failed for {track_namespace} (code {code}): {reason}")]
    SubscriptionFailed {
        /// Track namespace
        track_namespace: String,
        /// Error code
        code: u32,
        /// Error reason
        reason: String,
    },

    /// Subscription handle is not (or no longer) known to the session
    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound {
        /// Subscription identifier
        subscription_id: u64,
    },

    /// Track not found error
    #[error("Track not found: {track_namespace}")]
    TrackNotFound {
        /// Track namespace
        track_namespace: String,
    },

    /// Invalid data error
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Unknown media type tag in a chunk header
    #[error("Invalid media type tag: {tag}")]
    InvalidMediaType {
        /// Tag byte found on the wire
        tag: u8,
    },

    /// Chunk exceeds the demultiplexer's size limit
    #[error("Chunk too large: {size} bytes exceeds maximum {max_size} bytes")]
    ChunkTooLarge {
        /// Announced chunk size
        size: usize,
        /// Maximum accepted size
        max_size: usize,
    },
}

impl PlayoutError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            PlayoutError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            PlayoutError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            PlayoutError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            PlayoutError::InvalidState { .. } => "INVALID_STATE".to_string(),
            PlayoutError::SessionClosed => "SESSION_CLOSED".to_string(),
            PlayoutError::SubscriptionFailed { .. } => "SUBSCRIPTION_FAILED".to_string(),
            PlayoutError::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND".to_string(),
            PlayoutError::TrackNotFound { .. } => "TRACK_NOT_FOUND".to_string(),
            PlayoutError::InvalidData { .. } => "INVALID_DATA".to_string(),
            PlayoutError::InvalidMediaType { .. } => "INVALID_MEDIA_TYPE".to_string(),
            PlayoutError::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE".to_string(),
        }
    }

    /// Whether retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlayoutError::SubscriptionFailed { .. }
                | PlayoutError::InvalidData { .. }
                | PlayoutError::InvalidMediaType { .. }
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayoutError::SessionClosed => {
                "Connection to the stream was lost".to_string()
            }
            PlayoutError::SubscriptionFailed { track_namespace, .. } => {
                format!("Could not open track {}", track_namespace)
            }
            PlayoutError::TrackNotFound { track_namespace } => {
                format!("Track {} is not available", track_namespace)
            }
            PlayoutError::InvalidConfiguration { .. }
            | PlayoutError::MissingConfiguration { .. } => {
                "Player configuration is invalid".to_string()
            }
            _ => self.to_string(),
        }
    }
}
