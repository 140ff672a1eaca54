//! Timing sources and accuracy tiers
//!
//! A timing tier is a documented accuracy guarantee. Tier A is what a plain
//! software clock can promise; Tiers B and C need NIC hardware timestamps or an
//! external PPS/GPS reference. The classifier downgrades results whose
//! tolerance is tighter than the achieved tier instead of reporting them as
//! failures.

mod probe;

pub use probe::TimingCapabilities;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Timestamp accuracy tier, ordered from least to most precise
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimingTier {
    /// Software timestamps, ±1 ms
    #[serde(rename = "a", alias = "tier_a", alias = "A")]
    TierA,
    /// NIC hardware timestamps, ±100 µs
    #[serde(rename = "b", alias = "tier_b", alias = "B")]
    TierB,
    /// External PPS/GPS reference, ±1 µs
    #[serde(rename = "c", alias = "tier_c", alias = "C")]
    TierC,
}

impl TimingTier {
    /// Guaranteed accuracy (half-width of the error band)
    pub fn accuracy(&self) -> Duration {
        match self {
            TimingTier::TierA => Duration::from_millis(1),
            TimingTier::TierB => Duration::from_micros(100),
            TimingTier::TierC => Duration::from_micros(1),
        }
    }

    /// True when this tier can resolve measurements at `tolerance`.
    pub fn guarantees(&self, tolerance: Duration) -> bool {
        self.accuracy() <= tolerance
    }

    pub fn letter(&self) -> char {
        match self {
            TimingTier::TierA => 'A',
            TimingTier::TierB => 'B',
            TimingTier::TierC => 'C',
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TimingTier::TierA => "software timestamps (±1 ms); sufficient for functional tests",
            TimingTier::TierB => "NIC hardware timestamps (±100 µs); latency and jitter",
            TimingTier::TierC => "external PPS/GPS reference (±1 µs); time synchronization",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().trim_start_matches("tier").trim_matches(|c| c == '_' || c == ' ') {
            "a" => Some(TimingTier::TierA),
            "b" => Some(TimingTier::TierB),
            "c" => Some(TimingTier::TierC),
            _ => None,
        }
    }

    pub fn all() -> Vec<TimingTier> {
        vec![TimingTier::TierA, TimingTier::TierB, TimingTier::TierC]
    }
}

impl Default for TimingTier {
    fn default() -> Self {
        TimingTier::TierA
    }
}

impl fmt::Display for TimingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {} (±{:?})", self.letter(), self.accuracy())
    }
}

/// Nanoseconds since the owning source's epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_duration(d: Duration) -> Self {
        Self(d.as_nanos().min(u128::from(u64::MAX)) as u64)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    pub fn add(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(Self::from_duration(d).0))
    }

    /// Elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// A clock whose readings carry a known accuracy tier.
///
/// Transports stamp captured frames from the same source handlers read, so
/// differences between the two share one epoch.
pub trait TimingSource: Send + Sync {
    /// Tier actually delivered by this source
    fn tier(&self) -> TimingTier;

    fn now(&self) -> Timestamp;
}

/// Tier delivered for `requested` on a host with `capabilities`
pub fn achievable_tier(requested: TimingTier, capabilities: &TimingCapabilities) -> TimingTier {
    requested.min(capabilities.best_tier())
}

/// Monotonic clock anchored at construction
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    epoch: Instant,
    tier: TimingTier,
}

impl MonotonicClock {
    /// Plain software clock (Tier A)
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            tier: TimingTier::TierA,
        }
    }

    /// Clock reporting the best tier the host supports up to `requested`.
    pub fn for_host(requested: TimingTier, capabilities: &TimingCapabilities) -> Self {
        Self {
            epoch: Instant::now(),
            tier: achievable_tier(requested, capabilities),
        }
    }

    /// Mean cost of one clock read over `iterations` samples
    pub fn calibrate(&self, iterations: u32) -> Duration {
        let iterations = iterations.max(1);
        let start = Instant::now();
        let mut last = Timestamp::default();
        for _ in 0..iterations {
            last = self.now();
        }
        let total = start.elapsed();
        tracing::debug!(
            "clock calibration: {} reads, last={}ns, total={:?}",
            iterations,
            last.0,
            total
        );
        total / iterations
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingSource for MonotonicClock {
    fn tier(&self) -> TimingTier {
        self.tier
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.epoch.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_accuracy_ordering() {
        assert!(TimingTier::TierA < TimingTier::TierB);
        assert!(TimingTier::TierB < TimingTier::TierC);
        assert!(TimingTier::TierA.accuracy() > TimingTier::TierB.accuracy());
        assert!(TimingTier::TierB.accuracy() > TimingTier::TierC.accuracy());
    }

    #[test]
    fn test_guarantees() {
        assert!(TimingTier::TierA.guarantees(Duration::from_millis(100)));
        assert!(TimingTier::TierA.guarantees(Duration::from_millis(1)));
        assert!(!TimingTier::TierA.guarantees(Duration::from_micros(999)));
        assert!(TimingTier::TierC.guarantees(Duration::from_micros(1)));
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!(TimingTier::from_str("a"), Some(TimingTier::TierA));
        assert_eq!(TimingTier::from_str("tier_b"), Some(TimingTier::TierB));
        assert_eq!(TimingTier::from_str("Tier C"), Some(TimingTier::TierC));
        assert_eq!(TimingTier::from_str("d"), None);
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&TimingTier::TierB).unwrap();
        assert_eq!(json, "\"b\"");
        let tier: TimingTier = serde_yaml::from_str("tier_c").unwrap();
        assert_eq!(tier, TimingTier::TierC);
    }

    #[test]
    fn test_achievable_tier_is_capped() {
        let software = TimingCapabilities::default();
        assert_eq!(
            achievable_tier(TimingTier::TierC, &software),
            TimingTier::TierA
        );

        let hw = TimingCapabilities {
            hardware_timestamps: true,
            external_reference: false,
        };
        assert_eq!(achievable_tier(TimingTier::TierC, &hw), TimingTier::TierB);
        assert_eq!(achievable_tier(TimingTier::TierA, &hw), TimingTier::TierA);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t0 = Timestamp(1_000);
        let t1 = t0.add(Duration::from_micros(5));
        assert_eq!(t1.since(t0), Duration::from_micros(5));
        assert_eq!(t0.since(t1), Duration::ZERO);
    }

    #[test]
    fn test_monotonic_clock() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_eq!(clock.tier(), TimingTier::TierA);
        assert!(clock.calibrate(100) < Duration::from_millis(1));
    }
}
