//! Specification definitions
//!
//! A specification is one conformance requirement: where it comes from in the
//! standard, which parameters it varies, what the DUT must support for it to
//! apply, how the stimulus looks and what the DUT is expected to do.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::{EtherType, Tpid};
use crate::models::DutProfile;

/// Dotted clause reference such as `5.3.1`, ordered numerically
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClauseRef {
    parts: Vec<u32>,
}

impl ClauseRef {
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// First two components, e.g. `5.3`
    pub fn section(&self) -> String {
        self.parts
            .iter()
            .take(2)
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl FromStr for ClauseRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty clause reference".to_string());
        }
        let parts = trimmed
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("unparsable clause reference '{s}'"))?;
        Ok(Self { parts })
    }
}

impl TryFrom<String> for ClauseRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClauseRef> for String {
    fn from(value: ClauseRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClauseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

impl PartialOrd for ClauseRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClauseRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

/// Human-readable name of a TC8 switching section
pub fn section_title(section: &str) -> &'static str {
    match section {
        "5.3" => "VLAN",
        "5.4" => "General",
        "5.5" => "Address Learning",
        "5.6" => "Filtering",
        "5.7" => "Time Synchronization",
        "5.8" => "Quality of Service",
        "5.9" => "Configuration",
        _ => "Other",
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// VLAN tagging variant of a stimulus frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Untagged,
    SingleTagged,
    DoubleTagged,
}

impl FrameType {
    pub fn short(&self) -> &'static str {
        match self {
            FrameType::Untagged => "UT",
            FrameType::SingleTagged => "ST",
            FrameType::DoubleTagged => "DT",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Untagged => "untagged",
            FrameType::SingleTagged => "single_tagged",
            FrameType::DoubleTagged => "double_tagged",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "untagged" => Some(FrameType::Untagged),
            "single_tagged" => Some(FrameType::SingleTagged),
            "double_tagged" => Some(FrameType::DoubleTagged),
            _ => None,
        }
    }
}

/// Protocol carried by a stimulus frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Icmp,
    Arp,
    Ptp,
    Raw,
}

impl ProtocolType {
    pub fn ethertype(&self) -> EtherType {
        match self {
            ProtocolType::Icmp => EtherType::IPV4,
            ProtocolType::Arp => EtherType::ARP,
            ProtocolType::Ptp => EtherType::PTP,
            ProtocolType::Raw => EtherType::LOCAL_EXPERIMENTAL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolType::Icmp => "icmp",
            ProtocolType::Arp => "arp",
            ProtocolType::Ptp => "ptp",
            ProtocolType::Raw => "raw",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "icmp" => Some(ProtocolType::Icmp),
            "arp" => Some(ProtocolType::Arp),
            "ptp" => Some(ProtocolType::Ptp),
            "raw" => Some(ProtocolType::Raw),
            _ => None,
        }
    }
}

/// Closed set of parameter axes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    VlanId,
    Pcp,
    PayloadSize,
    FrameType,
    Tpid,
    Protocol,
}

impl AxisKind {
    pub fn name(&self) -> &'static str {
        match self {
            AxisKind::VlanId => "vlan_id",
            AxisKind::Pcp => "pcp",
            AxisKind::PayloadSize => "payload_size",
            AxisKind::FrameType => "frame_type",
            AxisKind::Tpid => "tpid",
            AxisKind::Protocol => "protocol",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "vlan_id" => Some(AxisKind::VlanId),
            "pcp" => Some(AxisKind::Pcp),
            "payload_size" => Some(AxisKind::PayloadSize),
            "frame_type" => Some(AxisKind::FrameType),
            "tpid" => Some(AxisKind::Tpid),
            "protocol" => Some(AxisKind::Protocol),
            _ => None,
        }
    }

    /// Integer-valued axes accept ranges
    pub fn is_numeric(&self) -> bool {
        matches!(self, AxisKind::VlanId | AxisKind::Pcp | AxisKind::PayloadSize)
    }

    /// Largest integer the axis accepts
    pub fn max_value(&self) -> u32 {
        match self {
            AxisKind::VlanId => 4095,
            AxisKind::Pcp => 7,
            AxisKind::PayloadSize => 9000,
            _ => 0,
        }
    }
}

/// One value of a parameter axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Int(u32),
    FrameType(FrameType),
    Tpid(Tpid),
    Protocol(ProtocolType),
}

impl AxisValue {
    pub fn as_int(&self) -> Option<u32> {
        match self {
            AxisValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Token used in case IDs, e.g. `V100`, `ST`, `T8100`
    pub fn token(&self, kind: AxisKind) -> String {
        match (kind, self) {
            (AxisKind::VlanId, AxisValue::Int(v)) => format!("V{v}"),
            (AxisKind::Pcp, AxisValue::Int(v)) => format!("Q{v}"),
            (AxisKind::PayloadSize, AxisValue::Int(v)) => format!("S{v}"),
            (_, AxisValue::FrameType(ft)) => ft.short().to_string(),
            (_, AxisValue::Tpid(t)) => format!("T{:04X}", t.value()),
            (_, AxisValue::Protocol(p)) => p.name().to_uppercase(),
            (_, AxisValue::Int(v)) => v.to_string(),
        }
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Int(v) => write!(f, "{v}"),
            AxisValue::FrameType(ft) => write!(f, "{}", ft.name()),
            AxisValue::Tpid(t) => write!(f, "{}", t.name()),
            AxisValue::Protocol(p) => write!(f, "{}", p.name()),
        }
    }
}

/// Named axis with its ordered, non-empty domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub kind: AxisKind,
    pub values: Vec<AxisValue>,
}

/// Condition on the DUT for a specification to apply
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Precondition {
    /// Named entry in the profile's feature set
    Feature(String),
    DoubleTagging,
    Gptp,
    CanReset,
    MinPorts(usize),
    /// Restricts VIDs and ingress ports to the configured VLAN layout
    VlanConfigured,
}

impl Precondition {
    /// Decided once per spec from the profile alone
    pub fn is_profile_level(&self) -> bool {
        !matches!(self, Precondition::VlanConfigured)
    }

    pub fn satisfied_by(&self, profile: &DutProfile) -> bool {
        match self {
            Precondition::Feature(name) => profile.has_feature(name),
            Precondition::DoubleTagging => profile.supports_double_tagging,
            Precondition::Gptp => profile.supports_gptp,
            Precondition::CanReset => profile.can_reset,
            Precondition::MinPorts(n) => profile.port_count >= *n,
            Precondition::VlanConfigured => !profile.configured_vids().is_empty(),
        }
    }
}

impl FromStr for Precondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(feature) = s.strip_prefix("feature:") {
            if feature.is_empty() {
                return Err("empty feature name".to_string());
            }
            return Ok(Precondition::Feature(feature.to_string()));
        }
        if let Some(n) = s.strip_prefix("min_ports:") {
            return n
                .parse()
                .map(Precondition::MinPorts)
                .map_err(|_| format!("invalid port count in '{s}'"));
        }
        match s {
            "double_tagging" => Ok(Precondition::DoubleTagging),
            "gptp" => Ok(Precondition::Gptp),
            "can_reset" => Ok(Precondition::CanReset),
            "vlan_configured" => Ok(Precondition::VlanConfigured),
            _ => Err(format!("unknown precondition '{s}'")),
        }
    }
}

impl TryFrom<String> for Precondition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Precondition> for String {
    fn from(value: Precondition) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Feature(name) => write!(f, "feature:{name}"),
            Precondition::DoubleTagging => write!(f, "double_tagging"),
            Precondition::Gptp => write!(f, "gptp"),
            Precondition::CanReset => write!(f, "can_reset"),
            Precondition::MinPorts(n) => write!(f, "min_ports:{n}"),
            Precondition::VlanConfigured => write!(f, "vlan_configured"),
        }
    }
}

/// Destination address class of the stimulus frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Test station behind the egress port
    #[default]
    Unicast,
    Broadcast,
    Multicast,
    /// Address never sourced by any station
    UnknownUnicast,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stimulus {
    #[serde(default)]
    pub destination: Destination,
    /// Send a frame from the egress station first so the DUT learns it
    #[serde(default)]
    pub learn_destination: bool,
}

/// Set of ports a forwarding outcome expects to receive the frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Every other member of the frame's VLAN
    VlanMembers,
    /// The case's egress port only
    Egress,
    /// Every other port, regardless of VLAN
    AllPorts,
    /// Dropped everywhere
    Nowhere,
}

/// Required tag state of frames leaving the DUT
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressTagging {
    Tagged,
    Untagged,
    /// Tag stack identical to what was sent
    Preserved,
    /// Tagged on trunk ports, untagged on access ports
    AsConfigured,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMetric {
    ForwardingLatency,
}

/// Expected DUT behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Forwarding {
        delivery: Delivery,
        tagging: Option<EgressTagging>,
    },
    Timing {
        metric: TimingMetric,
        expected: Duration,
    },
    /// Behavior the standard leaves to the implementation, or that needs
    /// stimulus beyond a single probe. Evidence is recorded, never judged.
    Observation { note: String },
}

impl ExpectedOutcome {
    pub fn is_timing(&self) -> bool {
        matches!(self, ExpectedOutcome::Timing { .. })
    }

    pub fn is_observation(&self) -> bool {
        matches!(self, ExpectedOutcome::Observation { .. })
    }

    /// Whether the outcome depends on ports other than the case's pair
    pub fn observes_flooding(&self) -> bool {
        matches!(
            self,
            ExpectedOutcome::Forwarding {
                delivery: Delivery::VlanMembers | Delivery::AllPorts | Delivery::Nowhere,
                ..
            } | ExpectedOutcome::Observation { .. }
        )
    }
}

impl fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedOutcome::Forwarding { delivery, tagging } => {
                write!(f, "forwarding to {delivery:?}")?;
                if let Some(t) = tagging {
                    write!(f, ", egress {t:?}")?;
                }
                Ok(())
            }
            ExpectedOutcome::Timing { metric, expected } => {
                write!(f, "{metric:?} of {expected:?}")
            }
            ExpectedOutcome::Observation { note } => write!(f, "observation: {note}"),
        }
    }
}

/// Validated, immutable specification record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecDefinition {
    pub id: String,
    pub clause: ClauseRef,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub axes: Vec<ParameterAxis>,
    pub preconditions: Vec<Precondition>,
    pub stimulus: Stimulus,
    pub expected: ExpectedOutcome,
    /// Half-width of the acceptance window for timing measurements
    pub tolerance: Duration,
}

impl SpecDefinition {
    pub fn section(&self) -> String {
        self.clause.section()
    }

    pub fn axis(&self, kind: AxisKind) -> Option<&ParameterAxis> {
        self.axes.iter().find(|a| a.kind == kind)
    }

    pub fn requires(&self, precondition: &Precondition) -> bool {
        self.preconditions.contains(precondition)
    }

    /// Profile-level preconditions the profile does not satisfy
    pub fn unmet_preconditions(&self, profile: &DutProfile) -> Vec<&Precondition> {
        self.preconditions
            .iter()
            .filter(|p| p.is_profile_level() && !p.satisfied_by(profile))
            .collect()
    }

    /// Ordering key: clause, then ID
    pub fn sort_key(&self) -> (&ClauseRef, &str) {
        (&self.clause, self.id.as_str())
    }
}
