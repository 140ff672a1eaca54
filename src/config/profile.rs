//! Named run profiles
//!
//! A run profile fixes the sampling tier and, optionally, the sections and
//! concurrency of a run, so `--profile smoke` stands for a known selection.

use serde::{Deserialize, Serialize};

use crate::executor::ConcurrencyPolicy;
use crate::models::SamplingTier;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tier: SamplingTier,
    /// Clause sections; empty selects the whole catalog
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyPolicy>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RunProfile {
    pub fn new(name: impl Into<String>, tier: SamplingTier) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tier,
            sections: Vec::new(),
            concurrency: None,
            max_workers: None,
            tags: Vec::new(),
        }
    }

    /// Boundary values on one port pair; minutes, not hours
    pub fn smoke() -> Self {
        Self::new("smoke", SamplingTier::Minimal)
            .with_description("Boundary values on a single port pair per binding")
            .with_tag("ci")
    }

    /// Interior points and every port once as ingress
    pub fn core() -> Self {
        Self::new("core", SamplingTier::Representative)
            .with_description("Representative values, each port once as ingress")
            .with_tag("regression")
    }

    /// Full Cartesian product over all valid port pairs
    pub fn full() -> Self {
        Self::new("full", SamplingTier::Exhaustive)
            .with_description("Every value on every valid port pair")
            .with_tag("certification")
    }

    /// VLAN and filtering clauses only
    pub fn vlan() -> Self {
        Self::new("vlan", SamplingTier::Representative)
            .with_description("VLAN handling and ingress filtering")
            .with_sections(["5.3", "5.6"])
    }

    /// Timing clauses, run one at a time so measurements do not contend
    pub fn timing() -> Self {
        let mut profile = Self::new("timing", SamplingTier::Representative)
            .with_description("Forwarding latency and time synchronization")
            .with_sections(["5.7"]);
        profile.concurrency = Some(ConcurrencyPolicy::Sequential);
        profile
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_sections<S: Into<String>>(mut self, sections: impl IntoIterator<Item = S>) -> Self {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn predefined() -> Vec<RunProfile> {
        vec![
            Self::smoke(),
            Self::core(),
            Self::full(),
            Self::vlan(),
            Self::timing(),
        ]
    }

    pub fn find(name: &str) -> Option<RunProfile> {
        Self::predefined().into_iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_map_to_tiers() {
        assert_eq!(RunProfile::smoke().tier, SamplingTier::Minimal);
        assert_eq!(RunProfile::core().tier, SamplingTier::Representative);
        assert_eq!(RunProfile::full().tier, SamplingTier::Exhaustive);
    }

    #[test]
    fn test_find_profile() {
        let profile = RunProfile::find("vlan").unwrap();
        assert_eq!(profile.sections, vec!["5.3".to_string(), "5.6".to_string()]);
        assert!(RunProfile::find("nightly").is_none());
    }

    #[test]
    fn test_timing_profile_is_sequential() {
        assert_eq!(
            RunProfile::timing().concurrency,
            Some(ConcurrencyPolicy::Sequential)
        );
    }

    #[test]
    fn test_minimal_yaml() {
        let profile: RunProfile = serde_yaml::from_str("name: quick\ntier: minimal\n").unwrap();
        assert_eq!(profile.tier, SamplingTier::Minimal);
        assert!(profile.sections.is_empty());
        assert!(profile.concurrency.is_none());
    }
}
