//! Environment variable configuration
//!
//! `L2_CONFORMANCE_*` variables override the config file and are in turn
//! overridden by command-line flags.

use std::env;
use tracing::warn;

use crate::executor::ConcurrencyPolicy;
use crate::models::SamplingTier;
use crate::timing::TimingTier;
use crate::utils::logger::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "L2_CONFORMANCE";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// L2_CONFORMANCE_CONFIG
    pub config_file: Option<String>,
    /// L2_CONFORMANCE_PROFILE
    pub dut_profile: Option<String>,
    /// L2_CONFORMANCE_CATALOG
    pub catalog: Option<String>,
    /// L2_CONFORMANCE_TIER
    pub tier: Option<SamplingTier>,
    /// L2_CONFORMANCE_TIMING_TIER
    pub timing_tier: Option<TimingTier>,
    /// L2_CONFORMANCE_SECTIONS, comma separated
    pub sections: Option<Vec<String>>,
    /// L2_CONFORMANCE_CONCURRENCY
    pub concurrency: Option<ConcurrencyPolicy>,
    /// L2_CONFORMANCE_WORKERS
    pub max_workers: Option<usize>,
    /// L2_CONFORMANCE_FRAME_TIMEOUT_MS
    pub frame_timeout_ms: Option<u64>,
    /// L2_CONFORMANCE_CASE_TIMEOUT_MS
    pub case_timeout_ms: Option<u64>,
    /// L2_CONFORMANCE_LOG
    pub log_level: Option<LogLevel>,
    /// L2_CONFORMANCE_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            dut_profile: get_env("PROFILE"),
            catalog: get_env("CATALOG"),
            tier: get_env_with("TIER", SamplingTier::from_str),
            timing_tier: get_env_with("TIMING_TIER", TimingTier::from_str),
            sections: get_env("SECTIONS").map(|v| split_list(&v)),
            concurrency: get_env_with("CONCURRENCY", ConcurrencyPolicy::from_str),
            max_workers: get_env_parse("WORKERS"),
            frame_timeout_ms: get_env_parse("FRAME_TIMEOUT_MS"),
            case_timeout_ms: get_env_parse("CASE_TIMEOUT_MS"),
            log_level: get_env_with("LOG", LogLevel::from_str),
            format: get_env("FORMAT"),
        }
    }

    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:           {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_PROFILE:          {:?}", ENV_PREFIX, self.dut_profile);
        println!("  {}_CATALOG:          {:?}", ENV_PREFIX, self.catalog);
        println!("  {}_TIER:             {:?}", ENV_PREFIX, self.tier);
        println!("  {}_TIMING_TIER:      {:?}", ENV_PREFIX, self.timing_tier);
        println!("  {}_SECTIONS:         {:?}", ENV_PREFIX, self.sections);
        println!("  {}_CONCURRENCY:      {:?}", ENV_PREFIX, self.concurrency);
        println!("  {}_WORKERS:          {:?}", ENV_PREFIX, self.max_workers);
        println!("  {}_FRAME_TIMEOUT_MS: {:?}", ENV_PREFIX, self.frame_timeout_ms);
        println!("  {}_CASE_TIMEOUT_MS:  {:?}", ENV_PREFIX, self.case_timeout_ms);
        println!("  {}_LOG:              {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_FORMAT:           {:?}", ENV_PREFIX, self.format);
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env_with(name, |v| v.trim().parse().ok())
}

/// Unparseable values are ignored with a warning rather than failing the run
fn get_env_with<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = get_env(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!("ignoring {}_{}={:?}: not a valid value", ENV_PREFIX, name, raw);
    }
    parsed
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sets `L2_CONFORMANCE_*` variables, mostly for tests
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set `L2_CONFORMANCE_{name}`
    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn tier(self, tier: SamplingTier) -> Self {
        self.var("TIER", tier.name())
    }

    pub fn workers(self, workers: usize) -> Self {
        self.var("WORKERS", workers.to_string())
    }

    pub fn sections(self, sections: &[&str]) -> Self {
        self.var("SECTIONS", sections.join(","))
    }

    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG            Path to configuration file");
    println!("  {ENV_PREFIX}_PROFILE           DUT profile (YAML or JSON)");
    println!("  {ENV_PREFIX}_CATALOG           Spec file or directory replacing the built-in catalog");
    println!("  {ENV_PREFIX}_TIER              Sampling tier (minimal, representative, exhaustive)");
    println!("  {ENV_PREFIX}_TIMING_TIER       Requested timing tier (a, b, c)");
    println!("  {ENV_PREFIX}_SECTIONS          Comma-separated clause sections, e.g. 5.3,5.6");
    println!("  {ENV_PREFIX}_CONCURRENCY       sequential or parallel");
    println!("  {ENV_PREFIX}_WORKERS           Maximum concurrent cases");
    println!("  {ENV_PREFIX}_FRAME_TIMEOUT_MS  Receive window per port");
    println!("  {ENV_PREFIX}_CASE_TIMEOUT_MS   Upper bound on one handler execution");
    println!("  {ENV_PREFIX}_LOG               Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_FORMAT            Output format (table, json, csv, summary)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PROFILE=lab-switch.yaml");
    println!("  export {ENV_PREFIX}_TIER=minimal");
    println!("  l2-conformance run --simulate");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.tier.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .tier(SamplingTier::Exhaustive)
            .workers(6)
            .sections(&["5.3", " 5.6 "])
            .var("TIMING_TIER", "tier_b")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.tier, Some(SamplingTier::Exhaustive));
        assert_eq!(config.max_workers, Some(6));
        assert_eq!(
            config.sections,
            Some(vec!["5.3".to_string(), "5.6".to_string()])
        );
        assert_eq!(config.timing_tier, Some(TimingTier::TierB));
        assert!(config.has_any());
    }

    #[test]
    fn test_invalid_values_ignored() {
        let _guard = EnvBuilder::new()
            .var("CONCURRENCY", "sideways")
            .var("CASE_TIMEOUT_MS", "soon")
            .apply_scoped();

        let config = EnvConfig::load();
        assert!(config.concurrency.is_none());
        assert!(config.case_timeout_ms.is_none());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("5.3, 5.4,,"), vec!["5.3", "5.4"]);
        assert!(split_list("").is_empty());
    }
}
