//! Concrete test cases produced by catalog expansion

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::codec::Tpid;
use crate::models::{
    AxisKind, AxisValue, ClauseRef, DutProfile, FrameType, PortConfig, PortId, ProtocolType,
};

/// Coverage/runtime trade-off used when expanding specifications
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingTier {
    /// Boundary values and one port pair
    Minimal,
    /// Boundaries plus interior points, each port once as ingress
    #[default]
    Representative,
    /// Full Cartesian product over all valid port pairs
    Exhaustive,
}

impl SamplingTier {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minimal" | "smoke" => Some(SamplingTier::Minimal),
            "representative" | "core" => Some(SamplingTier::Representative),
            "exhaustive" | "full" => Some(SamplingTier::Exhaustive),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SamplingTier::Minimal => "minimal",
            SamplingTier::Representative => "representative",
            SamplingTier::Exhaustive => "exhaustive",
        }
    }

    pub fn all() -> Vec<SamplingTier> {
        vec![
            SamplingTier::Minimal,
            SamplingTier::Representative,
            SamplingTier::Exhaustive,
        ]
    }
}

impl fmt::Display for SamplingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered (ingress, egress) port pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortPair {
    pub ingress: PortId,
    pub egress: PortId,
}

impl PortPair {
    pub fn new(ingress: PortId, egress: PortId) -> Self {
        Self { ingress, egress }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}->P{}", self.ingress, self.egress)
    }
}

/// One axis bound to one value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub axis: AxisKind,
    pub value: AxisValue,
}

/// A fully bound instance of a specification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub spec_id: String,
    pub clause: ClauseRef,
    pub section: String,
    pub tier: SamplingTier,
    /// Position in catalog order for the run
    pub seq: usize,
    pub bindings: Vec<Binding>,
    pub ports: Option<PortPair>,
    /// Ports the case must hold exclusively while it runs
    pub scope: BTreeSet<PortId>,
    /// Reason this case stands in for work that cannot run
    pub placeholder: Option<String>,
}

impl TestCase {
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn binding(&self, axis: AxisKind) -> Option<&AxisValue> {
        self.bindings
            .iter()
            .find(|b| b.axis == axis)
            .map(|b| &b.value)
    }

    pub fn vid(&self) -> Option<u16> {
        self.binding(AxisKind::VlanId)
            .and_then(|v| v.as_int())
            .map(|v| v as u16)
    }

    pub fn pcp(&self) -> u8 {
        self.binding(AxisKind::Pcp)
            .and_then(|v| v.as_int())
            .map(|v| v as u8)
            .unwrap_or(0)
    }

    pub fn payload_size(&self) -> usize {
        self.binding(AxisKind::PayloadSize)
            .and_then(|v| v.as_int())
            .map(|v| v as usize)
            .unwrap_or(46)
    }

    /// Explicit frame type, else single-tagged when a VID is bound
    pub fn frame_type(&self) -> FrameType {
        match self.binding(AxisKind::FrameType) {
            Some(AxisValue::FrameType(ft)) => *ft,
            _ if self.vid().is_some() => FrameType::SingleTagged,
            _ => FrameType::Untagged,
        }
    }

    pub fn tpid(&self) -> Tpid {
        match self.binding(AxisKind::Tpid) {
            Some(AxisValue::Tpid(t)) => *t,
            _ => Tpid::Cvlan,
        }
    }

    pub fn protocol(&self) -> ProtocolType {
        match self.binding(AxisKind::Protocol) {
            Some(AxisValue::Protocol(p)) => *p,
            _ => ProtocolType::Raw,
        }
    }

    /// VLAN the DUT should classify the stimulus into
    pub fn effective_vid(&self, profile: &DutProfile) -> Option<u16> {
        let ingress = profile.port(self.ingress()?)?;
        Some(effective_vid(
            self.frame_type(),
            self.tpid(),
            self.vid(),
            ingress,
            profile,
        ))
    }

    pub fn ingress(&self) -> Option<PortId> {
        self.ports.map(|p| p.ingress)
    }

    pub fn egress(&self) -> Option<PortId> {
        self.ports.map(|p| p.egress)
    }
}

/// Untagged, priority-tagged and unrecognised-TPID frames fall into the ingress PVID.
pub fn effective_vid(
    frame_type: FrameType,
    tpid: Tpid,
    vid: Option<u16>,
    ingress: &PortConfig,
    profile: &DutProfile,
) -> u16 {
    match frame_type {
        FrameType::Untagged => ingress.pvid,
        FrameType::SingleTagged if tpid != Tpid::Cvlan && !profile.supports_double_tagging => {
            ingress.pvid
        }
        _ => match vid {
            Some(0) | None => ingress.pvid,
            Some(v) => v,
        },
    }
}

/// Deterministic case ID: `{spec}_P{in}_P{eg}_{tokens}`
pub fn case_id(spec_id: &str, ports: Option<PortPair>, bindings: &[Binding]) -> String {
    let mut id = spec_id.to_string();
    if let Some(pair) = ports {
        id.push_str(&format!("_P{}_P{}", pair.ingress, pair.egress));
    }
    for binding in bindings {
        id.push('_');
        id.push_str(&binding.value.token(binding.axis));
    }
    id
}
