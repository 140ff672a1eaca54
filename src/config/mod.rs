//! Configuration module
//!
//! Run defaults come from a config file (searched in standard locations),
//! then `L2_CONFORMANCE_*` environment variables, then command-line flags.

mod env;
mod file;
mod profile;

pub use env::{print_env_help, EnvBuilder, EnvConfig, EnvGuard};
pub use file::ConfigFile;
pub use profile::RunProfile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::executor::EngineConfig;
use crate::models::SamplingTier;
use crate::timing::TimingTier;
use crate::utils::logger::LogLevel;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// DUT profile used when none is given on the command line
    pub dut_profile: Option<PathBuf>,

    /// Spec file or directory replacing the built-in catalog
    pub catalog: Option<PathBuf>,

    pub tier: SamplingTier,

    /// Best timing tier to use; the host may deliver less
    pub timing_tier: TimingTier,

    /// Clause sections to run; empty runs everything
    pub sections: Vec<String>,

    /// Interfaces probed for hardware timestamping
    pub timing_interfaces: Vec<String>,

    pub log_level: LogLevel,

    /// Concurrency, timeouts and session isolation
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dut_profile: None,
            catalog: None,
            tier: SamplingTier::Representative,
            timing_tier: TimingTier::TierA,
            sections: Vec::new(),
            timing_interfaces: Vec::new(),
            log_level: LogLevel::Info,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for section in &self.sections {
            validate_section(section)?;
        }
        if self.engine.max_workers == 0 {
            anyhow::bail!("engine.max_workers must be at least 1");
        }
        if self.engine.case_timeout_ms == 0 {
            anyhow::bail!("engine.case_timeout_ms must be positive");
        }
        if self.engine.session.link_wait_ms == 0 {
            anyhow::bail!("engine.session.link_wait_ms must be positive");
        }
        Ok(())
    }

    /// Overlay values set in the environment
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(path) = &env.dut_profile {
            self.dut_profile = Some(PathBuf::from(path));
        }
        if let Some(path) = &env.catalog {
            self.catalog = Some(PathBuf::from(path));
        }
        if let Some(tier) = env.tier {
            self.tier = tier;
        }
        if let Some(tier) = env.timing_tier {
            self.timing_tier = tier;
        }
        if let Some(sections) = &env.sections {
            self.sections = sections.clone();
        }
        if let Some(concurrency) = env.concurrency {
            self.engine.concurrency = concurrency;
        }
        if let Some(workers) = env.max_workers {
            self.engine.max_workers = workers;
        }
        if let Some(ms) = env.frame_timeout_ms {
            self.engine.frame_timeout_ms = ms;
        }
        if let Some(ms) = env.case_timeout_ms {
            self.engine.case_timeout_ms = ms;
        }
        if let Some(level) = env.log_level {
            self.log_level = level;
        }
    }
}

/// `5.3` style clause section
pub fn validate_section(section: &str) -> Result<()> {
    let parts: Vec<&str> = section.split('.').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty() || p.parse::<u32>().is_err()) {
        anyhow::bail!("Invalid clause section '{}': expected MAJOR.MINOR, e.g. 5.3", section);
    }
    Ok(())
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
