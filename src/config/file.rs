//! Configuration file management
//!
//! Handles finding, loading, validating and merging configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::profile::RunProfile;
use super::{is_yaml_file, validate_section, AppConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./l2-conformance.yaml",
    "./l2-conformance.yml",
    "./.l2-conformance.yaml",
    "~/.config/l2-conformance/config.yaml",
    "~/.l2-conformance.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub app: AppConfig,

    /// Named run profiles, in addition to the predefined ones
    #[serde(default)]
    pub run_profiles: Vec<RunProfile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            run_profiles: Vec::new(),
        }
    }
}

impl ConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// First existing file among the standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from the standard locations, or defaults when none exists
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        self.app.validate()?;

        for (i, profile) in self.run_profiles.iter().enumerate() {
            if profile.name.trim().is_empty() {
                anyhow::bail!("Run profile #{} has no name", i + 1);
            }
            if self.run_profiles[..i].iter().any(|p| p.name == profile.name) {
                anyhow::bail!("Duplicate run profile '{}'", profile.name);
            }
            for section in &profile.sections {
                validate_section(section)
                    .with_context(|| format!("in run profile '{}'", profile.name))?;
            }
            if profile.max_workers == Some(0) {
                anyhow::bail!("Run profile '{}' sets max_workers to 0", profile.name);
            }
        }

        Ok(())
    }

    /// Written by `config init`
    pub fn example() -> Self {
        let mut app = AppConfig::default();
        app.dut_profile = Some(PathBuf::from("dut.yaml"));
        app.timing_interfaces = vec!["eth0".to_string()];

        Self {
            version: default_version(),
            app,
            run_profiles: vec![RunProfile::new("nightly", crate::models::SamplingTier::Exhaustive)
                .with_description("Full catalog against the lab switch")
                .with_tag("lab")],
        }
    }

    /// File profiles shadow predefined ones of the same name
    pub fn run_profile(&self, name: &str) -> Option<RunProfile> {
        self.run_profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .or_else(|| RunProfile::find(name))
    }

    /// Predefined profiles followed by those only defined in this file
    pub fn all_run_profiles(&self) -> Vec<RunProfile> {
        let mut profiles: Vec<RunProfile> = RunProfile::predefined()
            .into_iter()
            .map(|p| self.run_profile(&p.name).unwrap_or(p))
            .collect();
        for profile in &self.run_profiles {
            if !profiles.iter().any(|p| p.name == profile.name) {
                profiles.push(profile.clone());
            }
        }
        profiles
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(&mut self, other: ConfigFile) {
        let defaults = AppConfig::default();
        let app = other.app;

        if app.dut_profile.is_some() {
            self.app.dut_profile = app.dut_profile;
        }
        if app.catalog.is_some() {
            self.app.catalog = app.catalog;
        }
        if app.tier != defaults.tier {
            self.app.tier = app.tier;
        }
        if app.timing_tier != defaults.timing_tier {
            self.app.timing_tier = app.timing_tier;
        }
        if !app.sections.is_empty() {
            self.app.sections = app.sections;
        }
        if !app.timing_interfaces.is_empty() {
            self.app.timing_interfaces = app.timing_interfaces;
        }
        if app.log_level != defaults.log_level {
            self.app.log_level = app.log_level;
        }
        if app.engine != defaults.engine {
            self.app.engine = app.engine;
        }

        for profile in other.run_profiles {
            match self.run_profiles.iter_mut().find(|p| p.name == profile.name) {
                Some(existing) => *existing = profile,
                None => self.run_profiles.push(profile),
            }
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SamplingTier;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"version": "9.9"}"#).unwrap();

        let err = ConfigFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Unsupported config version"));
    }

    #[test]
    fn test_duplicate_profiles_rejected() {
        let mut config = ConfigFile::default();
        config.run_profiles.push(RunProfile::new("lab", SamplingTier::Minimal));
        config.run_profiles.push(RunProfile::new("lab", SamplingTier::Exhaustive));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_lookup_prefers_file() {
        let mut config = ConfigFile::default();
        config
            .run_profiles
            .push(RunProfile::new("smoke", SamplingTier::Representative));

        assert_eq!(
            config.run_profile("smoke").unwrap().tier,
            SamplingTier::Representative
        );
        assert_eq!(config.run_profile("full").unwrap().tier, SamplingTier::Exhaustive);
        assert!(config.run_profile("missing").is_none());

        let names: Vec<String> = config.all_run_profiles().into_iter().map(|p| p.name).collect();
        assert_eq!(names.iter().filter(|n| n.as_str() == "smoke").count(), 1);
    }

    #[test]
    fn test_merge() {
        let mut base = ConfigFile::default();
        base.run_profiles.push(RunProfile::new("lab", SamplingTier::Minimal));

        let mut other = ConfigFile::default();
        other.app.tier = SamplingTier::Exhaustive;
        other.app.sections = vec!["5.5".to_string()];
        other.run_profiles.push(RunProfile::new("lab", SamplingTier::Exhaustive));
        other.run_profiles.push(RunProfile::new("bench", SamplingTier::Minimal));

        base.merge(other);
        assert_eq!(base.app.tier, SamplingTier::Exhaustive);
        assert_eq!(base.app.sections, vec!["5.5".to_string()]);
        assert_eq!(base.run_profiles.len(), 2);
        assert_eq!(base.run_profile("lab").unwrap().tier, SamplingTier::Exhaustive);
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./test.yaml"), PathBuf::from("./test.yaml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }
}
