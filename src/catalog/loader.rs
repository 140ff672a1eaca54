//! Catalog source parsing
//!
//! Raw serde records are converted into validated `SpecDefinition`s. Every
//! rejection names the offending record.

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::codec::Tpid;
use crate::models::{
    AxisKind, AxisValue, ClauseRef, Delivery, EgressTagging, ExpectedOutcome, FrameType,
    ParameterAxis, Precondition, Priority, ProtocolType, SpecDefinition, Stimulus, TimingMetric,
};

/// Catalog loading errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog syntax error: {0}")]
    Syntax(String),

    #[error("{spec}: unknown axis '{axis}'")]
    UnknownAxis { spec: String, axis: String },

    #[error("{spec}: axis '{axis}' has an empty domain")]
    EmptyDomain { spec: String, axis: String },

    #[error("{spec}: axis '{axis}' has invalid value '{value}'")]
    InvalidAxisValue {
        spec: String,
        axis: String,
        value: String,
    },

    #[error("{spec}: axis '{axis}' declared twice")]
    DuplicateAxis { spec: String, axis: String },

    #[error("{spec}: missing expected outcome")]
    MissingExpectedOutcome { spec: String },

    #[error("{spec}: invalid expected outcome: {reason}")]
    InvalidExpectedOutcome { spec: String, reason: String },

    #[error("{spec}: {reason}")]
    UnknownPrecondition { spec: String, reason: String },

    #[error("{spec}: {reason}")]
    InvalidClause { spec: String, reason: String },

    #[error("{spec}: tolerance must be a non-negative number of milliseconds")]
    InvalidTolerance { spec: String },

    #[error("duplicate spec ID {0}")]
    DuplicateId(String),
}

/// Source encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Yaml,
    Json,
}

impl SourceFormat {
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some("json") => SourceFormat::Json,
            _ => SourceFormat::Yaml,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    List(Vec<RawSpec>),
    Wrapped { specs: Vec<RawSpec> },
    Single(Box<RawSpec>),
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    id: String,
    clause: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    axes: Vec<RawAxis>,
    #[serde(default)]
    preconditions: Vec<String>,
    #[serde(default)]
    stimulus: Stimulus,
    expected: Option<RawExpected>,
    #[serde(default = "default_tolerance_ms")]
    tolerance_ms: f64,
}

fn default_tolerance_ms() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
struct RawAxis {
    name: String,
    #[serde(default)]
    values: Option<Vec<RawValue>>,
    #[serde(default)]
    range: Option<RawRange>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(u64),
    Name(String),
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Name(s) => write!(f, "{s}"),
        }
    }
}

/// Inclusive integer range
#[derive(Debug, Deserialize)]
struct RawRange {
    start: u32,
    end: u32,
    #[serde(default = "default_step")]
    step: u32,
}

fn default_step() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawExpected {
    #[serde(default)]
    forwarding: Option<Delivery>,
    #[serde(default)]
    tagging: Option<EgressTagging>,
    #[serde(default)]
    timing: Option<TimingMetric>,
    #[serde(default)]
    expected_ms: Option<f64>,
    #[serde(default)]
    observe: Option<String>,
}

/// Parse a catalog source into validated specifications, in source order.
pub fn parse_specs(content: &str, format: SourceFormat) -> Result<Vec<SpecDefinition>, CatalogError> {
    let documents: Vec<RawDocument> = match format {
        SourceFormat::Json => vec![serde_json::from_str(content)
            .map_err(|e| CatalogError::Syntax(e.to_string()))?],
        SourceFormat::Yaml => {
            let mut docs = Vec::new();
            for document in serde_yaml::Deserializer::from_str(content) {
                let value = serde_yaml::Value::deserialize(document)
                    .map_err(|e| CatalogError::Syntax(e.to_string()))?;
                if value.is_null() {
                    continue;
                }
                docs.push(
                    serde_yaml::from_value(value)
                        .map_err(|e| CatalogError::Syntax(e.to_string()))?,
                );
            }
            docs
        }
    };

    let mut seen = HashSet::new();
    let mut specs = Vec::new();
    for document in documents {
        let raws = match document {
            RawDocument::List(list) => list,
            RawDocument::Wrapped { specs } => specs,
            RawDocument::Single(spec) => vec![*spec],
        };
        for raw in raws {
            let spec = convert(raw)?;
            if !seen.insert(spec.id.clone()) {
                return Err(CatalogError::DuplicateId(spec.id));
            }
            specs.push(spec);
        }
    }
    Ok(specs)
}

fn convert(raw: RawSpec) -> Result<SpecDefinition, CatalogError> {
    let id = raw.id;

    let clause: ClauseRef = raw
        .clause
        .parse()
        .map_err(|reason| CatalogError::InvalidClause {
            spec: id.clone(),
            reason,
        })?;

    let mut axes = Vec::with_capacity(raw.axes.len());
    for raw_axis in raw.axes {
        let axis = convert_axis(&id, raw_axis)?;
        if axes.iter().any(|a: &ParameterAxis| a.kind == axis.kind) {
            return Err(CatalogError::DuplicateAxis {
                spec: id,
                axis: axis.kind.name().to_string(),
            });
        }
        axes.push(axis);
    }

    let preconditions = raw
        .preconditions
        .iter()
        .map(|p| p.parse::<Precondition>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|reason| CatalogError::UnknownPrecondition {
            spec: id.clone(),
            reason,
        })?;

    let expected = convert_expected(&id, raw.expected)?;

    if !raw.tolerance_ms.is_finite() || raw.tolerance_ms < 0.0 {
        return Err(CatalogError::InvalidTolerance { spec: id });
    }

    Ok(SpecDefinition {
        id,
        clause,
        title: raw.title,
        description: raw.description,
        priority: raw.priority,
        axes,
        preconditions,
        stimulus: raw.stimulus,
        expected,
        tolerance: millis(raw.tolerance_ms),
    })
}

/// Fractional milliseconds, rounded to the nearest nanosecond
fn millis(ms: f64) -> Duration {
    Duration::from_nanos((ms * 1_000_000.0).round() as u64)
}

fn convert_axis(spec: &str, raw: RawAxis) -> Result<ParameterAxis, CatalogError> {
    let kind = AxisKind::from_name(&raw.name).ok_or_else(|| CatalogError::UnknownAxis {
        spec: spec.to_string(),
        axis: raw.name.clone(),
    })?;

    let invalid = |value: String| CatalogError::InvalidAxisValue {
        spec: spec.to_string(),
        axis: raw.name.clone(),
        value,
    };

    let mut values = Vec::new();
    if let Some(range) = &raw.range {
        if !kind.is_numeric() {
            return Err(invalid(format!("range {}..={}", range.start, range.end)));
        }
        if range.end > kind.max_value() {
            return Err(invalid(range.end.to_string()));
        }
        if range.step == 0 {
            return Err(invalid("step 0".to_string()));
        }
        let mut v = range.start;
        while v <= range.end {
            values.push(AxisValue::Int(v));
            v = match v.checked_add(range.step) {
                Some(next) => next,
                None => break,
            };
        }
    }

    for value in raw.values.iter().flatten() {
        let parsed = match (kind, value) {
            (k, RawValue::Int(v)) if k.is_numeric() => u32::try_from(*v)
                .ok()
                .filter(|v| *v <= k.max_value())
                .map(AxisValue::Int),
            (AxisKind::FrameType, RawValue::Name(s)) => {
                FrameType::from_name(s).map(AxisValue::FrameType)
            }
            (AxisKind::Tpid, RawValue::Name(s)) => Tpid::from_name(s).map(AxisValue::Tpid),
            (AxisKind::Protocol, RawValue::Name(s)) => {
                ProtocolType::from_name(s).map(AxisValue::Protocol)
            }
            _ => None,
        };
        let parsed = parsed.ok_or_else(|| invalid(value.to_string()))?;
        if !values.contains(&parsed) {
            values.push(parsed);
        }
    }

    if values.is_empty() {
        return Err(CatalogError::EmptyDomain {
            spec: spec.to_string(),
            axis: raw.name,
        });
    }

    Ok(ParameterAxis { kind, values })
}

fn convert_expected(
    spec: &str,
    raw: Option<RawExpected>,
) -> Result<ExpectedOutcome, CatalogError> {
    let raw = raw.ok_or_else(|| CatalogError::MissingExpectedOutcome {
        spec: spec.to_string(),
    })?;
    let invalid = |reason: &str| CatalogError::InvalidExpectedOutcome {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    match (raw.forwarding, raw.timing, raw.observe) {
        (Some(delivery), None, None) => Ok(ExpectedOutcome::Forwarding {
            delivery,
            tagging: raw.tagging,
        }),
        (None, Some(metric), None) => {
            let ms = raw
                .expected_ms
                .ok_or_else(|| invalid("timing outcome needs expected_ms"))?;
            if !ms.is_finite() || ms < 0.0 {
                return Err(invalid("expected_ms must be non-negative"));
            }
            Ok(ExpectedOutcome::Timing {
                metric,
                expected: millis(ms),
            })
        }
        (None, None, Some(note)) => {
            if note.trim().is_empty() {
                return Err(invalid("observation needs a note"));
            }
            Ok(ExpectedOutcome::Observation { note })
        }
        (None, None, None) => Err(CatalogError::MissingExpectedOutcome {
            spec: spec.to_string(),
        }),
        _ => Err(invalid(
            "exactly one of forwarding, timing or observe may be declared",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_SPEC: &str = r#"
- id: SWITCH_VLAN_001
  clause: "5.3.1"
  title: VLAN membership
  axes:
    - name: vlan_id
      values: [1, 100]
    - name: frame_type
      values: [untagged, single_tagged]
  preconditions: [vlan_configured]
  expected:
    forwarding: vlan_members
"#;

    fn err(yaml: &str) -> CatalogError {
        parse_specs(yaml, SourceFormat::Yaml).unwrap_err()
    }

    #[test]
    fn test_parse_valid_spec() {
        let specs = parse_specs(ONE_SPEC, SourceFormat::Yaml).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.section(), "5.3");
        assert_eq!(spec.axes.len(), 2);
        assert_eq!(spec.axes[0].values, vec![AxisValue::Int(1), AxisValue::Int(100)]);
        assert_eq!(spec.tolerance, Duration::from_millis(100));
        assert_eq!(spec.preconditions, vec![Precondition::VlanConfigured]);
    }

    #[test]
    fn test_range_axis() {
        let yaml = ONE_SPEC.replace("values: [1, 100]", "range: { start: 1, end: 4094 }");
        let specs = parse_specs(&yaml, SourceFormat::Yaml).unwrap();
        assert_eq!(specs[0].axes[0].values.len(), 4094);
    }

    #[test]
    fn test_unknown_axis_names_record() {
        let yaml = ONE_SPEC.replace("name: frame_type", "name: color");
        let e = err(&yaml);
        assert!(matches!(e, CatalogError::UnknownAxis { .. }));
        assert!(e.to_string().contains("SWITCH_VLAN_001"));
    }

    #[test]
    fn test_empty_domain() {
        let yaml = ONE_SPEC.replace("values: [1, 100]", "range: { start: 10, end: 5 }");
        assert!(matches!(err(&yaml), CatalogError::EmptyDomain { .. }));
        let yaml = ONE_SPEC.replace("values: [1, 100]", "values: []");
        assert!(matches!(err(&yaml), CatalogError::EmptyDomain { .. }));
    }

    #[test]
    fn test_invalid_values() {
        let yaml = ONE_SPEC.replace("values: [1, 100]", "values: [1, 5000]");
        assert!(matches!(err(&yaml), CatalogError::InvalidAxisValue { .. }));
        let yaml = ONE_SPEC.replace("single_tagged", "triple_tagged");
        assert!(matches!(err(&yaml), CatalogError::InvalidAxisValue { .. }));
    }

    #[test]
    fn test_missing_expected() {
        let yaml = ONE_SPEC.replace("  expected:\n    forwarding: vlan_members\n", "");
        assert!(matches!(
            err(&yaml),
            CatalogError::MissingExpectedOutcome { .. }
        ));
    }

    #[test]
    fn test_unknown_precondition() {
        let yaml = ONE_SPEC.replace("[vlan_configured]", "[quantum_link]");
        assert!(matches!(
            err(&yaml),
            CatalogError::UnknownPrecondition { .. }
        ));
    }

    #[test]
    fn test_bad_clause() {
        let yaml = ONE_SPEC.replace("\"5.3.1\"", "\"five.three\"");
        assert!(matches!(err(&yaml), CatalogError::InvalidClause { .. }));
    }

    #[test]
    fn test_duplicate_id_across_documents() {
        let yaml = format!("{ONE_SPEC}\n---\n{ONE_SPEC}");
        assert!(matches!(err(&yaml), CatalogError::DuplicateId(id) if id == "SWITCH_VLAN_001"));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            err("- id: [unclosed"),
            CatalogError::Syntax(_)
        ));
    }

    #[test]
    fn test_json_source() {
        let json = r#"{"specs": [{
            "id": "SWITCH_TIME_001",
            "clause": "5.7.1",
            "title": "Forwarding latency",
            "expected": {"timing": "forwarding_latency", "expected_ms": 0.5},
            "tolerance_ms": 0.001
        }]}"#;
        let specs = parse_specs(json, SourceFormat::Json).unwrap();
        assert!(specs[0].expected.is_timing());
        assert_eq!(specs[0].tolerance, Duration::from_micros(1));
    }

    #[test]
    fn test_observation_outcome() {
        let yaml = ONE_SPEC.replace(
            "forwarding: vlan_members",
            "observe: runt handling is implementation-specific",
        );
        let specs = parse_specs(&yaml, SourceFormat::Yaml).unwrap();
        assert!(specs[0].expected.is_observation());

        let both = ONE_SPEC.replace(
            "forwarding: vlan_members",
            "forwarding: vlan_members\n    observe: also this",
        );
        assert!(matches!(
            err(&both),
            CatalogError::InvalidExpectedOutcome { .. }
        ));
    }

    #[test]
    fn test_timing_requires_expected_value() {
        let json = r#"[{"id": "T", "clause": "5.7.1", "title": "t",
            "expected": {"timing": "forwarding_latency"}}]"#;
        assert!(matches!(
            parse_specs(json, SourceFormat::Json).unwrap_err(),
            CatalogError::InvalidExpectedOutcome { .. }
        ));
    }
}
