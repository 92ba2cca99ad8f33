//! Media pipeline error types and handling
//!
//! Errors raised by decoders, the frame pool and track workers. Late and
//! stale data are not errors; they surface as worker events and counters.

use moqplay_core::{MediaType, PlayoutError};
use thiserror::Error;

/// Main error type for media pipeline operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Decoding operation failed
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Codec initialization failed
    #[error("Codec initialization failed: {codec} - {reason}")]
    CodecInitializationFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Chunk routed to a worker of the other media type
    #[error("Invalid media type: expected {expected}, got {actual}")]
    InvalidMediaType {
        /// Expected media type
        expected: MediaType,
        /// Actual media type
        actual: MediaType,
    },

    /// Every pooled frame buffer is checked out
    #[error("Frame pool exhausted: {capacity} buffers in use")]
    PoolExhausted {
        /// Pool capacity
        capacity: usize,
    },

    /// Track worker has shut down
    #[error("{media_type} worker is closed")]
    WorkerClosed {
        /// Track the worker served
        media_type: MediaType,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },

    /// Session or wire error from the core crate
    #[error(transparent)]
    Playout(#[from] PlayoutError),
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::DecodingFailed { .. } => true,
            MediaError::PoolExhausted { .. } => true,
            MediaError::CodecInitializationFailed { .. } => false,
            MediaError::WorkerClosed { .. } => false,
            MediaError::Playout(err) => err.is_recoverable(),
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::CodecInitializationFailed { .. } => ErrorCategory::Codec,
            MediaError::InvalidMediaType { .. } => ErrorCategory::Format,
            MediaError::PoolExhausted { .. } => ErrorCategory::Memory,
            MediaError::WorkerClosed { .. } => ErrorCategory::State,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::Playout(_) => ErrorCategory::Network,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Codec-related errors
    Codec,
    /// Format and data structure errors
    Format,
    /// State management errors
    State,
    /// Memory management errors
    Memory,
    /// Session and transport errors
    Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let decode_error = MediaError::DecodingFailed {
            codec: "vp8".to_string(),
            reason: "corrupt bitstream".to_string(),
        };
        assert_eq!(decode_error.category(), ErrorCategory::Codec);
        assert!(decode_error.is_recoverable());

        let init_error = MediaError::CodecInitializationFailed {
            codec: "opus".to_string(),
            reason: "unsupported sample rate".to_string(),
        };
        assert_eq!(init_error.category(), ErrorCategory::Codec);
        assert!(!init_error.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::WorkerClosed {
            media_type: MediaType::Video,
        };
        assert_eq!(error.to_string(), "video worker is closed");

        let error = MediaError::PoolExhausted { capacity: 8 };
        assert_eq!(error.to_string(), "Frame pool exhausted: 8 buffers in use");
    }

    #[test]
    fn test_error_from_playout() {
        let media_error = MediaError::from(PlayoutError::SessionClosed);
        assert_eq!(media_error.category(), ErrorCategory::Network);
        assert!(!media_error.is_recoverable());
        assert_eq!(media_error.to_string(), "Session closed");
    }
}
