//! Tiered sampling of parameter domains and port pairs

use crate::models::{PortId, PortPair, SamplingTier};

/// Indices into an ordered domain of `len` values selected for `tier`.
///
/// Minimal keeps the boundaries; representative adds the points at one
/// quarter, one half and three quarters of the index range; exhaustive keeps
/// everything. Each tier's selection contains the previous tier's.
pub fn select_indices(len: usize, tier: SamplingTier) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let last = len - 1;
    let mut picks = match tier {
        SamplingTier::Minimal => vec![0, last],
        SamplingTier::Representative => vec![0, last / 4, last / 2, (last * 3) / 4, last],
        SamplingTier::Exhaustive => (0..len).collect(),
    };
    picks.sort_unstable();
    picks.dedup();
    picks
}

/// Ordered port pairs for `tier`, among those `valid` accepts.
///
/// Candidates are enumerated ingress-major. Minimal takes the first valid
/// pair, representative the first valid egress for each ingress, exhaustive
/// every valid pair.
pub fn select_pairs(
    ports: &[PortId],
    tier: SamplingTier,
    valid: impl Fn(PortPair) -> bool,
) -> Vec<PortPair> {
    let mut pairs = Vec::new();
    for &ingress in ports {
        for &egress in ports {
            if ingress == egress {
                continue;
            }
            let pair = PortPair::new(ingress, egress);
            if !valid(pair) {
                continue;
            }
            match tier {
                SamplingTier::Minimal => return vec![pair],
                SamplingTier::Representative => {
                    pairs.push(pair);
                    break;
                }
                SamplingTier::Exhaustive => pairs.push(pair),
            }
        }
    }
    pairs
}

/// Number of pairs `select_pairs` would return, without materializing them
pub fn count_pairs(ports: &[PortId], tier: SamplingTier, valid: impl Fn(PortPair) -> bool) -> usize {
    select_pairs(ports, tier, valid).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_small_domains() {
        assert!(select_indices(0, SamplingTier::Exhaustive).is_empty());
        assert_eq!(select_indices(1, SamplingTier::Minimal), vec![0]);
        assert_eq!(select_indices(2, SamplingTier::Representative), vec![0, 1]);
        assert_eq!(select_indices(3, SamplingTier::Representative), vec![0, 1, 2]);
    }

    #[test]
    fn test_vid_boundaries() {
        // VIDs 1..=4094
        let len = 4094;
        assert_eq!(select_indices(len, SamplingTier::Minimal), vec![0, 4093]);
        let rep = select_indices(len, SamplingTier::Representative);
        assert_eq!(rep, vec![0, 1023, 2046, 3069, 4093]);
        assert_eq!(select_indices(len, SamplingTier::Exhaustive).len(), len);
    }

    #[test]
    fn test_indices_nested_across_tiers() {
        for len in 1..40 {
            let minimal = select_indices(len, SamplingTier::Minimal);
            let rep = select_indices(len, SamplingTier::Representative);
            let full = select_indices(len, SamplingTier::Exhaustive);
            assert!(minimal.iter().all(|i| rep.contains(i)));
            assert!(rep.iter().all(|i| full.contains(i)));
        }
    }

    #[test]
    fn test_pairs_by_tier() {
        let ports = [0, 1, 2];
        assert_eq!(
            select_pairs(&ports, SamplingTier::Minimal, |_| true),
            vec![PortPair::new(0, 1)]
        );
        assert_eq!(
            select_pairs(&ports, SamplingTier::Representative, |_| true),
            vec![
                PortPair::new(0, 1),
                PortPair::new(1, 0),
                PortPair::new(2, 0)
            ]
        );
        assert_eq!(count_pairs(&ports, SamplingTier::Exhaustive, |_| true), 6);
    }

    #[test]
    fn test_pairs_respect_validity() {
        let ports = [0, 1, 2];
        let only_from_two = |p: PortPair| p.ingress == 2;
        assert_eq!(
            select_pairs(&ports, SamplingTier::Minimal, only_from_two),
            vec![PortPair::new(2, 0)]
        );
        assert!(select_pairs(&ports, SamplingTier::Exhaustive, |_| false).is_empty());
    }
}
