//! Result classification
//!
//! Rules are applied in order and the first that matches decides:
//!
//! 1. a framework failure while collecting evidence is an **Error**;
//! 2. a timing outcome whose tolerance is tighter than the achieved timing
//!    tier guarantees is **Informational**;
//! 3. a placeholder case (unmet precondition, unsupported variant) is a
//!    **Skip**;
//! 4. an observation outcome records the evidence as **Informational**;
//! 5. evidence matching the expected outcome is a **Pass**;
//! 6. anything else is a **Fail** stating expected against observed.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::codec::{Tpid, VlanTag};
use crate::models::{
    Classification, Delivery, DutProfile, EgressTagging, Evidence, ExpectedOutcome, PortId,
    SpecDefinition, TestCase, TestResult,
};
use crate::timing::TimingTier;

/// What the engine got out of running (or not running) a case
#[derive(Clone, Debug)]
pub enum CaseOutcome {
    Collected(Evidence),
    Placeholder(String),
    FrameworkError(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    pub explanation: String,
    pub expected: String,
    pub observed: String,
}

impl Verdict {
    fn new(classification: Classification, explanation: impl Into<String>) -> Self {
        Self {
            classification,
            explanation: explanation.into(),
            expected: String::new(),
            observed: String::new(),
        }
    }

    fn with_expectation(mut self, expected: impl Into<String>, observed: impl Into<String>) -> Self {
        self.expected = expected.into();
        self.observed = observed.into();
        self
    }

    pub fn into_result(self, case: &TestCase) -> TestResult {
        TestResult::new(case, self.classification, self.explanation)
            .with_expectation(self.expected, self.observed)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResultClassifier;

impl ResultClassifier {
    pub fn classify(
        &self,
        spec: &SpecDefinition,
        case: &TestCase,
        outcome: &CaseOutcome,
        tier: TimingTier,
        profile: &DutProfile,
    ) -> Verdict {
        if let CaseOutcome::FrameworkError(cause) = outcome {
            return Verdict::new(Classification::Error, cause.clone());
        }

        if let ExpectedOutcome::Timing { expected, .. } = spec.expected {
            if !tier.guarantees(spec.tolerance) {
                let observed = match outcome {
                    CaseOutcome::Collected(evidence) => describe_latency(evidence.latency),
                    _ => "not measured".to_string(),
                };
                return Verdict::new(
                    Classification::Informational,
                    format!(
                        "tolerance ±{:?} is tighter than {} guarantees (±{:?})",
                        spec.tolerance,
                        tier,
                        tier.accuracy()
                    ),
                )
                .with_expectation(describe_window(expected, spec.tolerance), observed);
            }
        }

        let evidence = match outcome {
            CaseOutcome::Collected(evidence) => evidence,
            CaseOutcome::Placeholder(reason) => {
                return Verdict::new(Classification::Skip, reason.clone());
            }
            CaseOutcome::FrameworkError(cause) => {
                return Verdict::new(Classification::Error, cause.clone());
            }
        };

        match &spec.expected {
            ExpectedOutcome::Forwarding { delivery, tagging } => {
                classify_forwarding(case, profile, *delivery, *tagging, evidence)
            }
            ExpectedOutcome::Timing { expected, .. } => {
                classify_timing(*expected, spec.tolerance, evidence)
            }
            ExpectedOutcome::Observation { note } => Verdict::new(
                Classification::Informational,
                note.clone(),
            )
            .with_expectation(
                "recorded only",
                format!("ports {}", format_ports(&evidence.observed_ports())),
            ),
        }
    }
}

/// Ports a forwarding outcome expects to see the probe on
pub fn expected_ports(case: &TestCase, profile: &DutProfile, delivery: Delivery) -> BTreeSet<PortId> {
    let ingress = case.ingress();
    let others = case
        .scope
        .iter()
        .copied()
        .filter(|p| Some(*p) != ingress);
    match delivery {
        Delivery::VlanMembers => match case.effective_vid(profile) {
            Some(vid) => {
                let members = profile.members_of(vid);
                others.filter(|p| members.contains(p)).collect()
            }
            None => BTreeSet::new(),
        },
        Delivery::Egress => case.egress().into_iter().collect(),
        Delivery::AllPorts => others.collect(),
        Delivery::Nowhere => BTreeSet::new(),
    }
}

/// `{1, 2}` / `{}`
pub fn format_ports(ports: &BTreeSet<PortId>) -> String {
    let list: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    format!("{{{}}}", list.join(", "))
}

fn classify_forwarding(
    case: &TestCase,
    profile: &DutProfile,
    delivery: Delivery,
    tagging: Option<EgressTagging>,
    evidence: &Evidence,
) -> Verdict {
    let expected = expected_ports(case, profile, delivery);
    let observed = evidence.observed_ports();
    let expected_text = format!("ports {}", format_ports(&expected));
    let observed_text = format!("ports {}", format_ports(&observed));

    if expected != observed {
        return Verdict::new(
            Classification::Fail,
            format!(
                "expected ports {} but observed {}",
                format_ports(&expected),
                format_ports(&observed)
            ),
        )
        .with_expectation(expected_text, observed_text);
    }

    if let Some(tagging) = tagging {
        if let Err(problem) = check_tagging(case, profile, tagging, evidence) {
            return Verdict::new(Classification::Fail, problem)
                .with_expectation(format!("{expected_text}, {tagging:?} egress"), observed_text);
        }
    }

    Verdict::new(
        Classification::Pass,
        format!("delivered to {}", format_ports(&observed)),
    )
    .with_expectation(expected_text, observed_text)
}

fn check_tagging(
    case: &TestCase,
    profile: &DutProfile,
    tagging: EgressTagging,
    evidence: &Evidence,
) -> Result<(), String> {
    let sent = evidence
        .probe()
        .and_then(|r| r.decode())
        .ok_or_else(|| "probe frame missing from evidence".to_string())?;
    let vid = case
        .effective_vid(profile)
        .ok_or_else(|| "case has no ingress port".to_string())?;

    // the tag the DUT classified on is replaced at egress; anything inside it is carried
    let classifying = sent
        .tags
        .first()
        .is_some_and(|t| t.tpid == Tpid::Cvlan || profile.supports_double_tagging);
    let inner: &[VlanTag] = if classifying {
        &sent.tags[1..]
    } else {
        &sent.tags
    };

    for (&port, records) in &evidence.received {
        let trunk = profile.port(port).map(|p| p.trunk).unwrap_or(false);
        for record in records {
            let Some(frame) = record.decode() else {
                return Err(format!("port {port}: undecodable frame {}", record.summary));
            };
            let outer_matches = frame.tags.first().is_some_and(|t| t.vid == vid)
                && frame.tags.get(1..).unwrap_or(&[]) == inner;
            let ok = match tagging {
                EgressTagging::Tagged => outer_matches,
                EgressTagging::Untagged => frame.tags.as_slice() == inner,
                EgressTagging::Preserved => frame.tags == sent.tags,
                EgressTagging::AsConfigured if trunk => outer_matches,
                EgressTagging::AsConfigured => frame.tags.as_slice() == inner,
            };
            if !ok {
                return Err(format!(
                    "port {port}: egress tagging {} does not satisfy {tagging:?} (VID {vid}, {})",
                    describe_tags(&frame.tags),
                    if trunk { "trunk" } else { "access" }
                ));
            }
        }
    }
    Ok(())
}

fn classify_timing(expected: Duration, tolerance: Duration, evidence: &Evidence) -> Verdict {
    let window = describe_window(expected, tolerance);
    let Some(latency) = evidence.latency else {
        return Verdict::new(Classification::Fail, "no frame observed on the egress port")
            .with_expectation(window, "no frame");
    };

    let low = expected.saturating_sub(tolerance);
    let high = expected.saturating_add(tolerance);
    if latency >= low && latency <= high {
        Verdict::new(
            Classification::Pass,
            format!("latency {latency:?} within {window}"),
        )
        .with_expectation(window, describe_latency(Some(latency)))
    } else {
        Verdict::new(
            Classification::Fail,
            format!("latency {latency:?} outside {window}"),
        )
        .with_expectation(window, describe_latency(Some(latency)))
    }
}

fn describe_window(expected: Duration, tolerance: Duration) -> String {
    format!("{expected:?} ±{tolerance:?}")
}

fn describe_latency(latency: Option<Duration>) -> String {
    match latency {
        Some(l) => format!("{l:?}"),
        None => "no frame".to_string(),
    }
}

fn describe_tags(tags: &[VlanTag]) -> String {
    if tags.is_empty() {
        return "untagged".to_string();
    }
    let parts: Vec<String> = tags.iter().map(|t| format!("[{t}]")).collect();
    parts.join("")
}
