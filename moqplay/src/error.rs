//! Player error type

use moqplay_core::PlayoutError;
use moqplay_media::MediaError;
use thiserror::Error;

/// Errors surfaced by the [`Player`](crate::Player) facade
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Session, configuration or state error
    #[error(transparent)]
    Playout(#[from] PlayoutError),

    /// Worker or codec error
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Name refers to a track outside the video ladder
    #[error("'{name}' is not a video ladder track")]
    NotVideoTrack {
        /// Requested track name
        name: String,
    },

    /// Player has been shut down
    #[error("Player is closed")]
    Closed,
}

impl PlayerError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            PlayerError::Playout(e) => e.error_code(),
            PlayerError::Media(e) => format!("MEDIA_{:?}", e.category()).to_uppercase(),
            PlayerError::NotVideoTrack { .. } => "NOT_VIDEO_TRACK".to_string(),
            PlayerError::Closed => "PLAYER_CLOSED".to_string(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Playout(e) => e.is_recoverable(),
            PlayerError::Media(e) => e.is_recoverable(),
            PlayerError::NotVideoTrack { .. } => true,
            PlayerError::Closed => false,
        }
    }
}

/// Result alias for player operations
pub type PlayerResult<T> = Result<T, PlayerError>;
