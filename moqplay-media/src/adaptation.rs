//! Rate adaptation monitoring
//!
//! Tracks arrival jitter, drop ratio and bitrate for one track and decides
//! when the player should move to a reduced-rate variant or back.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Rate tier of the currently selected variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    /// Full-rate variant
    Normal,
    /// Reduced-rate variant
    Reduced,
}

/// Direction of a rate adaptation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptationSignal {
    /// Switch to the reduced-rate variant
    Down,
    /// Switch back to the full-rate variant
    Up,
}

/// Thresholds for rate adaptation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateMonitorConfig {
    /// Drop ratio above which the track adapts down
    pub drop_ratio_threshold: f64,
    /// Arrival jitter in milliseconds above which the track adapts down
    pub jitter_threshold_ms: f64,
    /// Arrival history used for jitter, in milliseconds
    pub jitter_window_ms: u64,
    /// Maximum arrivals kept for jitter
    pub max_samples: usize,
    /// Window for the bitrate estimate, in milliseconds
    pub bitrate_window_ms: u64,
    /// Buffer growth, relative to its size when draining began, needed to adapt up
    pub adapt_up_multiple: usize,
}

impl Default for RateMonitorConfig {
    fn default() -> Self {
        Self {
            drop_ratio_threshold: 0.2,  // 20% drops
            jitter_threshold_ms: 100.0, // 100ms jitter
            jitter_window_ms: 10_000,   // last 10 seconds
            max_samples: 600,           // 10s of 60fps video
            bitrate_window_ms: 1_000,   // 1 second
            adapt_up_multiple: 40,
        }
    }
}

impl RateMonitorConfig {
    /// React quickly to degradation
    pub fn low_latency() -> Self {
        Self {
            drop_ratio_threshold: 0.1, // 10% drops
            jitter_threshold_ms: 50.0, // 50ms jitter
            jitter_window_ms: 5_000,
            ..Self::default()
        }
    }

    /// Tolerate bursty networks before adapting
    pub fn resilient() -> Self {
        Self {
            drop_ratio_threshold: 0.3,  // 30% drops
            jitter_threshold_ms: 200.0, // 200ms jitter
            jitter_window_ms: 15_000,
            max_samples: 900,
            ..Self::default()
        }
    }
}

/// Per-track counters, accumulated for the whole playback session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationCounters {
    /// Chunks handed to the worker
    pub received: u64,
    /// Bytes handed to the worker
    pub received_bytes: u64,
    /// Chunks or units dropped as late
    pub dropped: u64,
    /// Bytes dropped
    pub dropped_bytes: u64,
    /// Retrieves answered with a delay
    pub delayed: u64,
    /// Underruns
    pub stale: u64,
    /// Units decoded
    pub decoded: u64,
    /// Decode failures
    pub decode_errors: u64,
    /// Units handed out for presentation
    pub rendered: u64,
}

/// Jitter, drop ratio and bitrate bookkeeping for one track
#[derive(Debug)]
pub struct RateMonitor {
    config: RateMonitorConfig,
    counters: AdaptationCounters,
    arrivals: VecDeque<Instant>,
    sizes: VecDeque<(Instant, usize)>,
    down_armed: bool,
}

impl RateMonitor {
    /// Create a monitor
    pub fn new(config: RateMonitorConfig) -> Self {
        Self {
            arrivals: VecDeque::with_capacity(config.max_samples.min(1024)),
            sizes: VecDeque::new(),
            config,
            counters: AdaptationCounters::default(),
            down_armed: true,
        }
    }

    /// Monitor configuration
    pub fn config(&self) -> &RateMonitorConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn counters(&self) -> AdaptationCounters {
        self.counters
    }

    /// Record a chunk arrival
    pub fn record_arrival(&mut self, now: Instant, size: usize) {
        self.counters.received += 1;
        self.counters.received_bytes += size as u64;

        self.arrivals.push_back(now);
        self.sizes.push_back((now, size));
        self.prune(now);
    }

    /// Record a dropped chunk or unit
    pub fn record_drop(&mut self, bytes: usize) {
        self.counters.dropped += 1;
        self.counters.dropped_bytes += bytes as u64;
    }

    /// Record a delayed retrieve
    pub fn record_delay(&mut self) {
        self.counters.delayed += 1;
    }

    /// Record an underrun
    pub fn record_stale(&mut self) {
        self.counters.stale += 1;
    }

    /// Record a decoded unit
    pub fn record_decoded(&mut self) {
        self.counters.decoded += 1;
    }

    /// Record a decode failure
    pub fn record_decode_error(&mut self) {
        self.counters.decode_errors += 1;
    }

    /// Record a unit handed out for presentation
    pub fn record_rendered(&mut self) {
        self.counters.rendered += 1;
    }

    /// `dropped / received`, 0 before anything arrived
    pub fn drop_ratio(&self) -> f64 {
        if self.counters.received == 0 {
            return 0.0;
        }
        self.counters.dropped as f64 / self.counters.received as f64
    }

    /// Standard deviation of inter-arrival gaps within the window, in ms
    pub fn jitter_ms(&self) -> f64 {
        if self.arrivals.len() < 3 {
            return 0.0;
        }
        let n = (self.arrivals.len() - 1) as f64;
        let mean = self.gaps_ms().sum::<f64>() / n;
        let variance = self.gaps_ms().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }

    fn gaps_ms(&self) -> impl Iterator<Item = f64> + '_ {
        self.arrivals
            .iter()
            .zip(self.arrivals.iter().skip(1))
            .map(|(a, b)| b.duration_since(*a).as_secs_f64() * 1000.0)
    }

    /// Bits per second received over the bitrate window ending at `now`
    pub fn bitrate_bps(&self, now: Instant) -> f64 {
        let window = Duration::from_millis(self.config.bitrate_window_ms);
        if window.is_zero() {
            return 0.0;
        }
        let bytes: usize = self
            .sizes
            .iter()
            .rev()
            .take_while(|(at, _)| now.saturating_duration_since(*at) <= window)
            .map(|(_, size)| size)
            .sum();
        bytes as f64 * 8.0 / window.as_secs_f64()
    }

    /// Whether drops or jitter exceed their thresholds
    pub fn is_degraded(&self) -> bool {
        self.drop_ratio() > self.config.drop_ratio_threshold
            || self.jitter_ms() > self.config.jitter_threshold_ms
    }

    /// Evaluate the downward trigger.
    ///
    /// Fires once when the degraded condition starts while `buffered`, and
    /// re-arms only after the condition clears.
    pub fn check_down(&mut self, buffered: bool) -> Option<AdaptationSignal> {
        let degraded = self.is_degraded();
        if !degraded {
            self.down_armed = true;
            return None;
        }
        if buffered && self.down_armed {
            self.down_armed = false;
            info!(
                "📉 Adapting down: drop ratio {:.3}, jitter {:.1}ms",
                self.drop_ratio(),
                self.jitter_ms()
            );
            return Some(AdaptationSignal::Down);
        }
        None
    }

    /// Whether a reduced-rate track has refilled enough to go back up
    pub fn should_adapt_up(&self, tier: RateTier, buffer_size: usize, drain_start_size: usize) -> bool {
        tier == RateTier::Reduced
            && drain_start_size > 0
            && buffer_size >= drain_start_size.saturating_mul(self.config.adapt_up_multiple)
    }

    fn prune(&mut self, now: Instant) {
        let window = Duration::from_millis(self.config.jitter_window_ms);
        while let Some(front) = self.arrivals.front() {
            if now.saturating_duration_since(*front) > window
                || self.arrivals.len() > self.config.max_samples
            {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }

        let bitrate_window = Duration::from_millis(self.config.bitrate_window_ms);
        while let Some((at, _)) = self.sizes.front() {
            if now.saturating_duration_since(*at) > bitrate_window {
                self.sizes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_ratio() {
        let mut monitor = RateMonitor::new(RateMonitorConfig::default());
        assert_eq!(monitor.drop_ratio(), 0.0);

        let now = Instant::now();
        for _ in 0..10 {
            monitor.record_arrival(now, 100);
        }
        monitor.record_drop(100);
        monitor.record_drop(100);
        assert!((monitor.drop_ratio() - 0.2).abs() < f64::EPSILON);
        assert_eq!(monitor.counters().dropped_bytes, 200);
    }

    #[test]
    fn test_down_is_edge_triggered() {
        let mut monitor = RateMonitor::new(RateMonitorConfig::default());
        let now = Instant::now();
        for _ in 0..4 {
            monitor.record_arrival(now, 10);
        }
        monitor.record_drop(10);
        monitor.record_drop(10);

        // Degraded but not yet buffered.
        assert_eq!(monitor.check_down(false), None);
        assert_eq!(monitor.check_down(true), Some(AdaptationSignal::Down));
        assert_eq!(monitor.check_down(true), None);

        // Clear the condition, then cross again.
        for _ in 0..96 {
            monitor.record_arrival(now, 10);
        }
        assert_eq!(monitor.check_down(true), None);
        for _ in 0..30 {
            monitor.record_drop(10);
        }
        assert_eq!(monitor.check_down(true), Some(AdaptationSignal::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_of_steady_arrivals_is_zero() {
        let mut monitor = RateMonitor::new(RateMonitorConfig::default());
        for _ in 0..10 {
            monitor.record_arrival(Instant::now(), 1000);
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        assert!(monitor.jitter_ms() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_of_bursty_arrivals() {
        let mut monitor = RateMonitor::new(RateMonitorConfig::default());
        // Gaps alternate 0ms and 400ms: mean 200, std-dev 200.
        for i in 0..21 {
            monitor.record_arrival(Instant::now(), 1000);
            if i % 2 == 1 {
                tokio::time::advance(Duration::from_millis(400)).await;
            }
        }
        let jitter = monitor.jitter_ms();
        assert!((jitter - 200.0).abs() < 1.0, "jitter was {}", jitter);
        assert!(monitor.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_forgets_arrivals_past_sample_cap() {
        let mut monitor = RateMonitor::new(RateMonitorConfig {
            max_samples: 5,
            ..RateMonitorConfig::default()
        });
        for gap in [0, 400, 0, 400] {
            tokio::time::advance(Duration::from_millis(gap)).await;
            monitor.record_arrival(Instant::now(), 1000);
        }
        assert!(monitor.jitter_ms() > 100.0);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(20)).await;
            monitor.record_arrival(Instant::now(), 1000);
        }
        assert!(monitor.jitter_ms() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bitrate_window() {
        let mut monitor = RateMonitor::new(RateMonitorConfig::default());
        monitor.record_arrival(Instant::now(), 10_000);
        tokio::time::advance(Duration::from_millis(1500)).await;
        for _ in 0..4 {
            monitor.record_arrival(Instant::now(), 1_000);
        }
        assert_eq!(monitor.bitrate_bps(Instant::now()), 32_000.0);
    }

    #[test]
    fn test_adapt_up_condition() {
        let monitor = RateMonitor::new(RateMonitorConfig::default());
        assert!(!monitor.should_adapt_up(RateTier::Normal, 400, 2));
        assert!(!monitor.should_adapt_up(RateTier::Reduced, 79, 2));
        assert!(monitor.should_adapt_up(RateTier::Reduced, 80, 2));
        assert!(!monitor.should_adapt_up(RateTier::Reduced, 80, 0));
    }
}
