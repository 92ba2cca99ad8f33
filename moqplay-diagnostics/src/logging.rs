//! Structured logging setup

use moqplay_core::PlayoutError;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,moqplay_media=info";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Fails if a global
/// subscriber is already installed or the filter does not parse.
pub fn init_logging(default_filter: &str) -> Result<(), PlayoutError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| PlayoutError::InvalidConfiguration {
            reason: format!("Invalid log filter '{}': {}", default_filter, e),
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| PlayoutError::Initialization {
            reason: format!("Logging already initialized: {}", e),
        })
}

/// Install a test-friendly subscriber; repeated calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = init_logging("moqplay=loudest").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_repeated_test_logging_is_harmless() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("logging initialized twice");
    }
}
