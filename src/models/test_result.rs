//! Test result models
//!
//! Defines classifications, per-case results and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{section_title, Evidence, SamplingTier, TestCase};
use crate::session::SessionState;
use crate::timing::TimingTier;

/// Five-way classification of a case outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Pass,
    Fail,
    /// Measured, but the timing tier cannot resolve the required tolerance
    Informational,
    Skip,
    Error,
}

impl Classification {
    pub fn symbol(&self) -> &'static str {
        match self {
            Classification::Pass => "✓",
            Classification::Fail => "✗",
            Classification::Informational => "i",
            Classification::Skip => "○",
            Classification::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Pass)
    }

    /// Pass and Fail are the only verdicts about the DUT itself
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Classification::Pass | Classification::Fail)
    }

    pub fn all() -> Vec<Classification> {
        vec![
            Classification::Pass,
            Classification::Fail,
            Classification::Informational,
            Classification::Skip,
            Classification::Error,
        ]
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Pass => write!(f, "PASS"),
            Classification::Fail => write!(f, "FAIL"),
            Classification::Informational => write!(f, "INFO"),
            Classification::Skip => write!(f, "SKIP"),
            Classification::Error => write!(f, "ERROR"),
        }
    }
}

/// One log event emitted while a case ran
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.message
        )
    }
}

/// Result of a single test case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub case_id: String,
    pub spec_id: String,
    pub clause: String,
    pub section: String,
    pub classification: Classification,
    pub explanation: String,
    pub expected: String,
    pub observed: String,
    pub evidence: Option<Evidence>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timing_tier: TimingTier,
    pub session_state: SessionState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_entries: Vec<LogEntry>,
}

impl TestResult {
    pub fn new(
        case: &TestCase,
        classification: Classification,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case.id.clone(),
            spec_id: case.spec_id.clone(),
            clause: case.clause.to_string(),
            section: case.section.clone(),
            classification,
            explanation: explanation.into(),
            expected: String::new(),
            observed: String::new(),
            evidence: None,
            started_at: Utc::now(),
            duration_ms: 0,
            timing_tier: TimingTier::TierA,
            session_state: SessionState::Clean,
            log_entries: Vec::new(),
        }
    }

    pub fn pass(case: &TestCase, explanation: impl Into<String>) -> Self {
        Self::new(case, Classification::Pass, explanation)
    }

    pub fn fail(case: &TestCase, explanation: impl Into<String>) -> Self {
        Self::new(case, Classification::Fail, explanation)
    }

    pub fn skip(case: &TestCase, reason: impl Into<String>) -> Self {
        Self::new(case, Classification::Skip, reason)
    }

    pub fn error(case: &TestCase, error: impl Into<String>) -> Self {
        Self::new(case, Classification::Error, error)
    }

    pub fn with_expectation(mut self, expected: impl Into<String>, observed: impl Into<String>) -> Self {
        self.expected = expected.into();
        self.observed = observed.into();
        self
    }

    pub fn with_evidence(mut self, evidence: Option<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        self.started_at = started_at;
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_tier(mut self, tier: TimingTier) -> Self {
        self.timing_tier = tier;
        self
    }

    pub fn with_session_state(mut self, state: SessionState) -> Self {
        self.session_state = state;
        self
    }

    pub fn with_log_entries(mut self, entries: Vec<LogEntry>) -> Self {
        self.log_entries = entries;
        self
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.classification.symbol(),
            self.case_id,
            self.duration_ms
        )?;
        if !self.explanation.is_empty() {
            write!(f, " - {}", self.explanation)?;
        }
        Ok(())
    }
}

/// Per-classification counts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub informational: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ClassCounts {
    pub fn add(&mut self, classification: Classification) {
        self.total += 1;
        match classification {
            Classification::Pass => self.passed += 1,
            Classification::Fail => self.failed += 1,
            Classification::Informational => self.informational += 1,
            Classification::Skip => self.skipped += 1,
            Classification::Error => self.errors += 1,
        }
    }

    /// passed / (passed + failed), in percent
    pub fn pass_rate(&self) -> f64 {
        let conclusive = self.passed + self.failed;
        if conclusive == 0 {
            0.0
        } else {
            (self.passed as f64 / conclusive as f64) * 100.0
        }
    }
}

/// Counts for one clause section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub section: String,
    pub title: String,
    pub counts: ClassCounts,
}

/// Summary of a complete run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dut: String,
    pub tier: SamplingTier,
    pub timing_tier: TimingTier,
    pub started_at: DateTime<Utc>,
    pub counts: ClassCounts,
    pub sections: Vec<SectionSummary>,
    pub cancelled: bool,
    pub not_run: usize,
    pub total_duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl RunReport {
    pub fn new(
        dut: impl Into<String>,
        tier: SamplingTier,
        timing_tier: TimingTier,
        results: Vec<TestResult>,
    ) -> Self {
        let mut counts = ClassCounts::default();
        let mut by_section: BTreeMap<String, ClassCounts> = BTreeMap::new();
        for result in &results {
            counts.add(result.classification);
            by_section
                .entry(result.section.clone())
                .or_default()
                .add(result.classification);
        }

        let sections = by_section
            .into_iter()
            .map(|(section, counts)| SectionSummary {
                title: section_title(&section).to_string(),
                section,
                counts,
            })
            .collect();

        Self {
            run_id: generate_run_id(),
            dut: dut.into(),
            tier,
            timing_tier,
            started_at: Utc::now(),
            counts,
            sections,
            cancelled: false,
            not_run: 0,
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
        }
    }

    pub fn with_cancellation(mut self, cancelled: bool, not_run: usize) -> Self {
        self.cancelled = cancelled;
        self.not_run = not_run;
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, total_duration_ms: u64) -> Self {
        self.started_at = started_at;
        self.total_duration_ms = total_duration_ms;
        self
    }

    pub fn pass_rate(&self) -> f64 {
        self.counts.pass_rate()
    }

    pub fn is_all_passed(&self) -> bool {
        self.counts.failed == 0 && self.counts.errors == 0 && !self.cancelled
    }

    pub fn results_with(&self, classification: Classification) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| r.classification == classification)
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} - {} ({})", self.run_id, self.dut, self.tier)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Info: {} | Skip: {} | Error: {}",
            self.counts.total,
            self.counts.passed,
            self.counts.failed,
            self.counts.informational,
            self.counts.skipped,
            self.counts.errors
        )?;
        if self.cancelled {
            writeln!(f, "Cancelled: {} cases not run", self.not_run)?;
        }
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

/// `YYYYMMDD_HHMMSS_NNNN`
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = rand::random::<u32>() % 10000;
    format!("{timestamp}_{suffix:04}")
}
