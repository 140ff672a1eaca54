//! Specification expansion into concrete test cases

use std::collections::BTreeSet;

use super::sampling::{select_indices, select_pairs};
use crate::codec::Tpid;
use crate::models::{
    case_id, effective_vid, AxisKind, AxisValue, Binding, Delivery, DutProfile, ExpectedOutcome,
    FrameType, PortId, PortPair, Precondition, SamplingTier, SpecDefinition, TestCase,
};

/// Expand one specification for `profile` under `tier`.
///
/// Cases come out in lexicographic order over the sampled axis-value indices
/// (axes in declared order) with the port pair innermost. `seq` is left at 0;
/// the catalog numbers cases across the whole run.
pub fn expand(spec: &SpecDefinition, tier: SamplingTier, profile: &DutProfile) -> Vec<TestCase> {
    let unmet = spec.unmet_preconditions(profile);
    if !unmet.is_empty() {
        let names: Vec<String> = unmet.iter().map(|p| p.to_string()).collect();
        return vec![placeholder(
            spec,
            tier,
            Vec::new(),
            format!("precondition not met by {}: {}", profile.name, names.join(", ")),
        )];
    }

    let vlan_filter = spec.requires(&Precondition::VlanConfigured);
    let configured = profile.configured_vids();

    let domains: Vec<(AxisKind, Vec<AxisValue>)> = spec
        .axes
        .iter()
        .map(|axis| {
            let values = if axis.kind == AxisKind::VlanId && vlan_filter {
                axis.values
                    .iter()
                    .filter(|v| {
                        v.as_int()
                            .map(|vid| configured.contains(&(vid as u16)))
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect()
            } else {
                axis.values.clone()
            };
            (axis.kind, values)
        })
        .collect();

    if let Some((kind, _)) = domains.iter().find(|(_, values)| values.is_empty()) {
        return vec![placeholder(
            spec,
            tier,
            Vec::new(),
            format!("no {} value is configured on {}", kind.name(), profile.name),
        )];
    }

    let sampled: Vec<Vec<usize>> = domains
        .iter()
        .map(|(_, values)| select_indices(values.len(), tier))
        .collect();

    let ports: Vec<PortId> = profile.port_ids().collect();
    let all_ports: BTreeSet<PortId> = ports.iter().copied().collect();
    let whole_dut = spec.expected.observes_flooding() || spec.stimulus.learn_destination;

    let mut cases = Vec::new();
    let mut cursor = vec![0usize; domains.len()];
    loop {
        let bindings: Vec<Binding> = domains
            .iter()
            .zip(&sampled)
            .zip(&cursor)
            .map(|(((kind, values), picks), &c)| Binding {
                axis: *kind,
                value: values[picks[c]],
            })
            .collect();

        let frame_type = frame_type_of(&bindings);
        let collapsed_tpid = frame_type == FrameType::Untagged
            && domains
                .iter()
                .zip(&cursor)
                .any(|((kind, _), &c)| *kind == AxisKind::Tpid && c != 0);

        if collapsed_tpid {
            // identical untagged frame already emitted with the first TPID
        } else if frame_type == FrameType::DoubleTagged && !profile.supports_double_tagging {
            cases.push(placeholder(
                spec,
                tier,
                bindings,
                format!("{} does not support double tagging", profile.name),
            ));
        } else {
            let vid = vid_of(&bindings);
            let tpid = tpid_of(&bindings);
            let pairs = select_pairs(&ports, tier, |pair| {
                pair_is_valid(spec, profile, pair, frame_type, tpid, vid, vlan_filter)
            });

            if pairs.is_empty() {
                cases.push(placeholder(
                    spec,
                    tier,
                    bindings,
                    "no valid port pair on this DUT".to_string(),
                ));
            } else {
                for pair in pairs {
                    let scope = if whole_dut {
                        all_ports.clone()
                    } else {
                        BTreeSet::from([pair.ingress, pair.egress])
                    };
                    cases.push(TestCase {
                        id: case_id(&spec.id, Some(pair), &bindings),
                        spec_id: spec.id.clone(),
                        clause: spec.clause.clone(),
                        section: spec.section(),
                        tier,
                        seq: 0,
                        bindings: bindings.clone(),
                        ports: Some(pair),
                        scope,
                        placeholder: None,
                    });
                }
            }
        }

        if !advance(&mut cursor, &sampled) {
            break;
        }
    }
    cases
}

/// Odometer step, last axis fastest. False once every combination was visited.
fn advance(cursor: &mut [usize], sampled: &[Vec<usize>]) -> bool {
    for axis in (0..cursor.len()).rev() {
        cursor[axis] += 1;
        if cursor[axis] < sampled[axis].len() {
            return true;
        }
        cursor[axis] = 0;
    }
    false
}

fn frame_type_of(bindings: &[Binding]) -> FrameType {
    let explicit = bindings.iter().find_map(|b| match b.value {
        AxisValue::FrameType(ft) => Some(ft),
        _ => None,
    });
    match explicit {
        Some(ft) => ft,
        None if vid_of(bindings).is_some() => FrameType::SingleTagged,
        None => FrameType::Untagged,
    }
}

fn vid_of(bindings: &[Binding]) -> Option<u16> {
    bindings
        .iter()
        .find(|b| b.axis == AxisKind::VlanId)
        .and_then(|b| b.value.as_int())
        .map(|v| v as u16)
}

fn tpid_of(bindings: &[Binding]) -> Tpid {
    bindings
        .iter()
        .find_map(|b| match b.value {
            AxisValue::Tpid(t) => Some(t),
            _ => None,
        })
        .unwrap_or(Tpid::Cvlan)
}

fn pair_is_valid(
    spec: &SpecDefinition,
    profile: &DutProfile,
    pair: PortPair,
    frame_type: FrameType,
    tpid: Tpid,
    vid: Option<u16>,
    vlan_filter: bool,
) -> bool {
    let (Some(ingress), Some(egress)) = (profile.port(pair.ingress), profile.port(pair.egress))
    else {
        return false;
    };
    let eff = effective_vid(frame_type, tpid, vid, ingress, profile);

    if vlan_filter {
        if !ingress.is_member(eff) {
            return false;
        }
        if frame_type == FrameType::Untagged && vid.is_some_and(|v| v != ingress.pvid) {
            return false;
        }
    }

    match spec.expected {
        // Delivery to one egress port is only defined when both ends share the VLAN
        ExpectedOutcome::Forwarding {
            delivery: Delivery::Egress,
            ..
        } => {
            ingress.is_member(eff)
                && egress.is_member(eff)
                && (frame_type != FrameType::Untagged || egress.pvid == eff)
        }
        // A drop is only expected where the ingress port is outside the VLAN
        ExpectedOutcome::Forwarding {
            delivery: Delivery::Nowhere,
            ..
        } => !ingress.is_member(eff),
        _ => true,
    }
}

fn placeholder(
    spec: &SpecDefinition,
    tier: SamplingTier,
    bindings: Vec<Binding>,
    reason: String,
) -> TestCase {
    TestCase {
        id: case_id(&spec.id, None, &bindings),
        spec_id: spec.id.clone(),
        clause: spec.clause.clone(),
        section: spec.section(),
        tier,
        seq: 0,
        bindings,
        ports: None,
        scope: BTreeSet::new(),
        placeholder: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::loader::{parse_specs, SourceFormat};
    use crate::models::PortConfig;

    fn spec(yaml: &str) -> SpecDefinition {
        parse_specs(yaml, SourceFormat::Yaml).unwrap().remove(0)
    }

    fn membership_spec() -> SpecDefinition {
        spec(
            r#"
- id: SWITCH_VLAN_001
  clause: "5.3.1"
  title: VLAN membership
  axes:
    - name: vlan_id
      range: { start: 1, end: 4094 }
  preconditions: [vlan_configured]
  expected:
    forwarding: vlan_members
"#,
        )
    }

    fn two_port_profile() -> DutProfile {
        DutProfile::new(
            "two-port",
            vec![
                PortConfig::new(0, "eth0"),
                PortConfig::new(1, "eth1").with_vlans([100]).with_pvid(100),
            ],
        )
    }

    #[test]
    fn test_vlan_membership_minimal() {
        let cases = expand(&membership_spec(), SamplingTier::Minimal, &two_port_profile());
        let summary: Vec<(Option<u16>, Option<PortPair>)> =
            cases.iter().map(|c| (c.vid(), c.ports)).collect();
        assert_eq!(
            summary,
            vec![
                (Some(1), Some(PortPair::new(0, 1))),
                (Some(100), Some(PortPair::new(1, 0))),
            ]
        );
        assert_eq!(cases[0].id, "SWITCH_VLAN_001_P0_P1_V1");
        assert_eq!(cases[0].scope, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_unmet_feature_gives_single_placeholder() {
        let s = spec(
            r#"
- id: SWITCH_QOS_001
  clause: "5.8.1"
  title: Priority mapping
  axes:
    - name: pcp
      range: { start: 0, end: 7 }
  preconditions: ["feature:qos"]
  expected:
    forwarding: egress
"#,
        );
        let cases = expand(&s, SamplingTier::Exhaustive, &DutProfile::reference());
        assert_eq!(cases.len(), 1);
        assert!(cases[0].is_placeholder());
        assert!(cases[0]
            .placeholder
            .as_deref()
            .unwrap()
            .contains("feature:qos"));
    }

    #[test]
    fn test_double_tagged_bindings_become_placeholders() {
        let s = spec(
            r#"
- id: SWITCH_VLAN_010
  clause: "5.3.10"
  title: Tag variants
  axes:
    - name: frame_type
      values: [untagged, single_tagged, double_tagged]
    - name: tpid
      values: [cvlan, svlan]
  expected:
    forwarding: vlan_members
"#,
        );
        let cases = expand(&s, SamplingTier::Minimal, &DutProfile::reference());
        // untagged collapses to one TPID; minimal samples first and last frame type
        let kinds: Vec<(FrameType, bool)> = cases
            .iter()
            .map(|c| (c.frame_type(), c.is_placeholder()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (FrameType::Untagged, false),
                (FrameType::DoubleTagged, true),
                (FrameType::DoubleTagged, true),
            ]
        );

        let mut capable = DutProfile::reference();
        capable.supports_double_tagging = true;
        let cases = expand(&s, SamplingTier::Minimal, &capable);
        assert!(cases.iter().all(|c| !c.is_placeholder()));
    }

    #[test]
    fn test_untagged_collapses_tpid_axis() {
        let s = spec(
            r#"
- id: SWITCH_VLAN_011
  clause: "5.3.11"
  title: TPID variants
  axes:
    - name: frame_type
      values: [untagged, single_tagged]
    - name: tpid
      values: [cvlan, svlan, legacy]
  expected:
    forwarding: vlan_members
"#,
        );
        let cases = expand(&s, SamplingTier::Exhaustive, &DutProfile::reference());
        let untagged = cases
            .iter()
            .filter(|c| c.frame_type() == FrameType::Untagged)
            .count();
        let tagged = cases
            .iter()
            .filter(|c| c.frame_type() == FrameType::SingleTagged)
            .count();
        // 12 ordered pairs on four ports
        assert_eq!(untagged, 12);
        assert_eq!(tagged, 36);
    }

    #[test]
    fn test_no_valid_pair_placeholder() {
        let s = spec(
            r#"
- id: SWITCH_ADDR_002
  clause: "5.5.2"
  title: Learned unicast
  axes:
    - name: vlan_id
      values: [10]
  stimulus:
    learn_destination: true
  expected:
    forwarding: egress
"#,
        );
        let profile = DutProfile::new(
            "isolated",
            vec![
                PortConfig::new(0, "eth0").with_vlans([1, 10]),
                PortConfig::new(1, "eth1"),
            ],
        );
        let cases = expand(&s, SamplingTier::Exhaustive, &profile);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, "SWITCH_ADDR_002_V10");
        assert!(cases[0].is_placeholder());
    }

    #[test]
    fn test_tiers_are_monotone_and_nested() {
        let s = spec(
            r#"
- id: SWITCH_VLAN_020
  clause: "5.3.20"
  title: Matrix
  axes:
    - name: vlan_id
      values: [1, 10, 100]
    - name: pcp
      range: { start: 0, end: 7 }
    - name: frame_type
      values: [single_tagged, double_tagged]
  preconditions: [vlan_configured]
  expected:
    forwarding: vlan_members
"#,
        );
        let profile = DutProfile::reference();
        let minimal = expand(&s, SamplingTier::Minimal, &profile);
        let rep = expand(&s, SamplingTier::Representative, &profile);
        let full = expand(&s, SamplingTier::Exhaustive, &profile);
        assert!(minimal.len() <= rep.len());
        assert!(rep.len() <= full.len());

        let key = |c: &TestCase| (c.bindings.clone(), c.ports);
        for case in &minimal {
            assert!(rep.iter().any(|r| key(r) == key(case)), "{} missing", case.id);
            assert!(full.iter().any(|f| key(f) == key(case)), "{} missing", case.id);
        }
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let profile = DutProfile::reference();
        let a = expand(&membership_spec(), SamplingTier::Representative, &profile);
        let b = expand(&membership_spec(), SamplingTier::Representative, &profile);
        assert_eq!(a, b);
    }
}
