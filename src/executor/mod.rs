//! Test execution engine
//!
//! Drives expanded cases through the session protocol and the handlers, either
//! one at a time or on a bounded worker pool where cases with disjoint port
//! sets run concurrently.

mod cancel;
mod parallel;
mod runner;

pub use cancel::CancelToken;
pub use parallel::{DispatchSummary, Engine, ResultStream};
pub use runner::CaseRunner;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::models::DutProfile;
use crate::session::SessionPolicy;

/// How the dispatcher schedules cases
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Catalog order, one case at a time
    Sequential,
    /// Worker pool over port-disjoint cases
    #[default]
    Parallel,
}

impl ConcurrencyPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" | "serial" => Some(ConcurrencyPolicy::Sequential),
            "parallel" => Some(ConcurrencyPolicy::Parallel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Sequential => "sequential",
            ConcurrencyPolicy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Engine knobs. Durations are in milliseconds so config files stay flat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyPolicy,
    pub max_workers: usize,
    /// Upper bound on one handler execution
    pub case_timeout_ms: u64,
    /// Receive window per port
    pub frame_timeout_ms: u64,
    /// Stop dispatching once the run has lasted this long
    pub run_deadline_secs: Option<u64>,
    pub session: SessionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyPolicy::default(),
            max_workers: 4,
            case_timeout_ms: 30_000,
            frame_timeout_ms: 2_000,
            run_deadline_secs: None,
            session: SessionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn sequential() -> Self {
        Self {
            concurrency: ConcurrencyPolicy::Sequential,
            max_workers: 1,
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_session(mut self, session: SessionPolicy) -> Self {
        self.session = session;
        self
    }

    pub fn with_deadline(mut self, secs: u64) -> Self {
        self.run_deadline_secs = Some(secs);
        self
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.case_timeout_ms.max(1))
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    /// DUTs that cannot take traffic on two port sets at once run one case at a time
    pub fn is_sequential_for(&self, profile: &DutProfile) -> bool {
        self.concurrency == ConcurrencyPolicy::Sequential
            || self.max_workers <= 1
            || !profile.supports_simultaneous_traffic
    }
}
