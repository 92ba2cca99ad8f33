//! # MoQ Play Diagnostics
//!
//! Logging setup and playout condition profiling for moqplay.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod logging;
pub mod profiler;

// Re-export main types
pub use logging::{init_logging, init_test_logging, DEFAULT_FILTER};
pub use profiler::{ConditionReport, PlayoutProfiler, TrackConditions};
