//! Data models for conformance testing
//!
//! This module contains all data structures shared across the catalog, the
//! session controller, the engine and the classifier.

mod dut;
mod evidence;
mod spec;
mod test_case;
mod test_result;

pub use dut::{DutProfile, PortConfig, PortId, ResetMode, SchemaError};
pub use evidence::{Evidence, FrameRecord};
pub use spec::{
    section_title, AxisKind, AxisValue, ClauseRef, Delivery, Destination, EgressTagging,
    ExpectedOutcome, FrameType, ParameterAxis, Precondition, Priority, ProtocolType,
    SpecDefinition, Stimulus, TimingMetric,
};
pub use test_case::{case_id, effective_vid, Binding, PortPair, SamplingTier, TestCase};
pub use test_result::{
    generate_run_id, ClassCounts, Classification, LogEntry, RunReport, SectionSummary,
    TestResult,
};
