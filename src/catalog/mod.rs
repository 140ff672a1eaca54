//! Specification catalog
//!
//! Loads declarative specification records (YAML, single or multi-document,
//! or JSON), keeps them in clause order and expands them into the ordered
//! case stream a run executes. A TC8 Layer-2 switching catalog is embedded.

mod expand;
mod loader;
mod sampling;

pub use expand::expand;
pub use loader::{parse_specs, CatalogError, SourceFormat};
pub use sampling::{count_pairs, select_indices, select_pairs};

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{DutProfile, SamplingTier, SpecDefinition, TestCase};

const BUILTIN_CATALOG: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/specs/tc8_layer2.yaml"
));

/// Immutable, clause-ordered set of specifications
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    specs: Vec<Arc<SpecDefinition>>,
}

/// Expansion size of one specification
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub spec_id: String,
    pub clause: String,
    pub title: String,
    pub cases: usize,
    pub placeholders: usize,
}

impl Catalog {
    pub fn from_specs(specs: Vec<SpecDefinition>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            if !seen.insert(spec.id.as_str()) {
                return Err(CatalogError::DuplicateId(spec.id.clone()));
            }
        }
        let mut specs: Vec<Arc<SpecDefinition>> = specs.into_iter().map(Arc::new).collect();
        specs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(Self { specs })
    }

    /// Parse catalog source text of a known encoding
    pub fn parse(content: &str, format: SourceFormat) -> Result<Self, CatalogError> {
        Self::from_specs(parse_specs(content, format)?)
    }

    /// Embedded TC8 Layer-2 catalog
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::parse(BUILTIN_CATALOG, SourceFormat::Yaml)
    }

    /// Load a catalog file, or every `.yaml`/`.yml`/`.json` file in a directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let io_err = |source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        };

        let files = if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)
                .map_err(io_err)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml" | "json")
                    )
                })
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut specs = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file).map_err(|source| CatalogError::Io {
                path: file.display().to_string(),
                source,
            })?;
            let format = SourceFormat::from_extension(file.extension().and_then(|e| e.to_str()));
            let parsed = parse_specs(&content, format)?;
            debug!("loaded {} specs from {}", parsed.len(), file.display());
            specs.extend(parsed);
        }
        Self::from_specs(specs)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SpecDefinition>> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SpecDefinition>> {
        self.specs.iter()
    }

    pub fn sections(&self) -> BTreeSet<String> {
        self.specs.iter().map(|s| s.section()).collect()
    }

    /// Specs in the given sections; an empty filter selects everything
    pub fn select<'a>(
        &'a self,
        sections: &'a [String],
    ) -> impl Iterator<Item = &'a Arc<SpecDefinition>> + 'a {
        self.specs
            .iter()
            .filter(move |s| sections.is_empty() || sections.contains(&s.section()))
    }

    /// The run's ordered case stream, numbered in catalog order.
    pub fn expand_all(
        &self,
        tier: SamplingTier,
        profile: &DutProfile,
        sections: &[String],
    ) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for spec in self.select(sections) {
            let expanded = expand(spec, tier, profile);
            debug!("{}: {} cases", spec.id, expanded.len());
            cases.extend(expanded);
        }
        for (seq, case) in cases.iter_mut().enumerate() {
            case.seq = seq;
        }
        info!(
            "expanded {} specs into {} cases ({} tier, {})",
            self.select(sections).count(),
            cases.len(),
            tier,
            profile.name
        );
        cases
    }

    /// Per-spec case counts without running anything
    pub fn plan(
        &self,
        tier: SamplingTier,
        profile: &DutProfile,
        sections: &[String],
    ) -> Vec<PlanEntry> {
        self.select(sections)
            .map(|spec| {
                let cases = expand(spec, tier, profile);
                PlanEntry {
                    spec_id: spec.id.clone(),
                    clause: spec.clause.to_string(),
                    title: spec.title.clone(),
                    placeholders: cases.iter().filter(|c| c.is_placeholder()).count(),
                    cases: cases.len(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Clause IDs of the TC8 Layer-2 switching chapter
    fn tc8_ids() -> Vec<String> {
        let sections = [
            ("VLAN", 21),
            ("GEN", 10),
            ("ADDR", 21),
            ("FILT", 11),
            ("TIME", 1),
            ("QOS", 4),
            ("CFG", 3),
        ];
        sections
            .iter()
            .flat_map(|(name, count)| (1..=*count).map(move |n| format!("SWITCH_{name}_{n:03}")))
            .collect()
    }

    #[test]
    fn test_builtin_catalog_covers_tc8_ids() {
        let catalog = Catalog::builtin().unwrap();
        let ids = tc8_ids();
        assert_eq!(ids.len(), 71);
        for id in &ids {
            assert!(catalog.get(id).is_some(), "{id} missing from the builtin catalog");
        }

        // anything else is an engine extension and says so in its ID
        let extras: Vec<&str> = catalog
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !ids.iter().any(|known| known == id))
            .collect();
        assert_eq!(extras, vec!["SWITCH_TIME_X01", "SWITCH_TIME_X02"]);
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.len() >= 71);
        let sections = catalog.sections();
        for s in ["5.3", "5.4", "5.5", "5.6", "5.7", "5.8", "5.9"] {
            assert!(sections.contains(s), "missing section {s}");
        }
    }

    #[test]
    fn test_clause_ordering() {
        let catalog = Catalog::builtin().unwrap();
        let clauses: Vec<_> = catalog.iter().map(|s| s.clause.clone()).collect();
        let mut sorted = clauses.clone();
        sorted.sort();
        assert_eq!(clauses, sorted);
    }

    #[test]
    fn test_expand_all_numbers_cases() {
        let catalog = Catalog::builtin().unwrap();
        let profile = DutProfile::reference();
        let cases = catalog.expand_all(SamplingTier::Minimal, &profile, &[]);
        assert!(!cases.is_empty());
        assert!(cases.iter().enumerate().all(|(i, c)| c.seq == i));

        let again = catalog.expand_all(SamplingTier::Minimal, &profile, &[]);
        assert_eq!(cases, again);
    }

    #[test]
    fn test_section_filter() {
        let catalog = Catalog::builtin().unwrap();
        let profile = DutProfile::reference();
        let sections = vec!["5.3".to_string()];
        let cases = catalog.expand_all(SamplingTier::Minimal, &profile, &sections);
        assert!(cases.iter().all(|c| c.section == "5.3"));
    }

    #[test]
    fn test_plan_monotone_across_tiers() {
        let catalog = Catalog::builtin().unwrap();
        let profile = DutProfile::reference();
        let total = |tier| -> usize {
            catalog
                .plan(tier, &profile, &[])
                .iter()
                .map(|e| e.cases)
                .sum()
        };
        assert!(total(SamplingTier::Minimal) <= total(SamplingTier::Representative));
        assert!(total(SamplingTier::Representative) <= total(SamplingTier::Exhaustive));
    }

    #[test]
    fn test_parse_source_text() {
        let catalog = Catalog::parse(
            r#"[{"id": "B_1", "clause": "5.4.1", "title": "b", "expected": {"forwarding": "nowhere"}}]"#,
            SourceFormat::Json,
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(Catalog::parse("- id: [", SourceFormat::Yaml).is_err());
    }

    #[test]
    fn test_load_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "- id: A_1\n  clause: \"5.4.2\"\n  title: a\n  expected:\n    forwarding: egress\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"id": "B_1", "clause": "5.4.1", "title": "b", "expected": {"forwarding": "nowhere"}}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        let ids: Vec<&str> = catalog.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["B_1", "A_1"]);
    }

    #[test]
    fn test_duplicate_ids_across_files() {
        let dir = tempdir().unwrap();
        let record = "- id: DUP\n  clause: \"5.4.1\"\n  title: a\n  expected:\n    forwarding: egress\n";
        std::fs::write(dir.path().join("a.yaml"), record).unwrap();
        std::fs::write(dir.path().join("b.yaml"), record).unwrap();
        assert!(matches!(
            Catalog::load(dir.path()),
            Err(CatalogError::DuplicateId(_))
        ));
    }
}
