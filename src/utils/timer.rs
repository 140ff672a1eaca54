//! Wall-clock timing for cases and run phases
//!
//! These measure how long the harness itself takes. Frame timestamps come
//! from the run's `TimingSource` instead.

use std::time::{Duration, Instant};

/// Elapsed time of one labelled activity
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Log and return the elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

/// Cumulative lap marks across the phases of a command
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    pub fn lap(&mut self, label: impl Into<String>) {
        let elapsed = self.start.elapsed();
        self.laps.push((label.into(), elapsed));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Duration of each phase rather than the cumulative mark
    pub fn lap_times(&self) -> Vec<(String, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let lap = cumulative.saturating_sub(prev);
                prev = *cumulative;
                (label.clone(), lap)
            })
            .collect()
    }

    /// `catalog 3ms, expand 1ms, run 812ms (total 816ms)`
    pub fn format(&self) -> String {
        let phases: Vec<String> = self
            .lap_times()
            .into_iter()
            .map(|(label, d)| format!("{} {}ms", label, d.as_millis()))
            .collect();
        format!("{} (total {}ms)", phases.join(", "), self.total().as_millis())
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
