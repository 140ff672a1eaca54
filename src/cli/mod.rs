//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Layer-2 switch conformance test engine
#[derive(Parser, Debug)]
#[command(name = "l2-conformance")]
#[command(version)]
#[command(about = "Run TC8 Layer-2 conformance specifications against an Ethernet switch")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List specifications in the catalog
    List(ListArgs),

    /// Show how many cases each specification expands into
    Plan(PlanArgs),

    /// Check a DUT profile and spec catalog without running anything
    Validate(ValidateArgs),

    /// Run the conformance suite
    Run(RunArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Catalog and selection flags shared by plan and run
#[derive(Parser, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// DUT profile (YAML or JSON)
    #[arg(short, long)]
    pub profile: Option<PathBuf>,

    /// Spec file or directory replacing the built-in catalog
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Sampling tier (minimal, representative, exhaustive)
    #[arg(short, long)]
    pub tier: Option<String>,

    /// Named run profile (smoke, core, full, vlan, timing or one from the config file)
    #[arg(short, long)]
    pub run_profile: Option<String>,

    /// Clause sections to include, e.g. 5.3 (repeatable)
    #[arg(short, long)]
    pub section: Vec<String>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Spec file or directory replacing the built-in catalog
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only this clause section
    #[arg(short, long)]
    pub section: Option<String>,

    /// Show axes, preconditions and descriptions
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// DUT profile to check
    #[arg(short, long)]
    pub profile: Option<PathBuf>,

    /// Spec file or directory to check
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Run against the built-in simulated switch
    #[arg(long)]
    pub simulate: bool,

    /// Run one case at a time
    #[arg(long)]
    pub sequential: bool,

    /// Maximum concurrent cases
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Stop dispatching new cases after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Requested timing tier (a, b, c)
    #[arg(long)]
    pub timing_tier: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save the report to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print frame evidence and captured logs for failed and errored cases
    #[arg(long)]
    pub evidence: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Show environment overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(default_value = "./l2-conformance.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List run profiles
    Profiles,

    /// Describe the supported environment variables
    Env,
}
