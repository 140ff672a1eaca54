//! l2-conformance - Layer-2 switch conformance test engine
//!
//! Runs the TC8 Layer-2 specification catalog against an Ethernet switch
//! described by a DUT profile.
//!
//! ## Usage
//!
//! ```bash
//! # List the built-in catalog
//! l2-conformance list --detailed
//!
//! # How many cases a profile expands into
//! l2-conformance plan --profile lab-switch.yaml --tier exhaustive
//!
//! # Check a profile and a custom catalog
//! l2-conformance validate --profile lab-switch.yaml --catalog specs/
//!
//! # Run the smoke selection against the simulated switch
//! l2-conformance run --simulate --run-profile smoke --format summary
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use l2_conformance::catalog::Catalog;
use l2_conformance::config::{
    print_env_help, validate_section, ConfigFile, EnvConfig, RunProfile,
};
use l2_conformance::executor::{CaseRunner, ConcurrencyPolicy, Engine, EngineConfig};
use l2_conformance::models::{section_title, Classification, DutProfile, SamplingTier};
use l2_conformance::output::{write_report_to_file, OutputFormat, ResultFormatter};
use l2_conformance::timing::{MonotonicClock, TimingCapabilities, TimingSource, TimingTier};
use l2_conformance::transport::SimulatedSwitch;
use l2_conformance::utils::log_capture::CaseLogs;
use l2_conformance::utils::logger::{init_logger, LogLevel};
use l2_conformance::utils::timer::Stopwatch;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = EnvConfig::load();
    let mut file = load_config(args.config.as_deref(), &env)?;
    file.app.apply_env(&env);
    file.app.validate().context("Invalid configuration after environment overrides")?;

    let logs = init_logger(LogLevel::from_flags(file.app.log_level, args.verbose, args.quiet));

    match args.command {
        cli::Command::List(list_args) => {
            list_specs(list_args, &file)?;
        }
        cli::Command::Plan(plan_args) => {
            show_plan(plan_args, &file)?;
        }
        cli::Command::Validate(validate_args) => {
            validate_inputs(validate_args, &file)?;
        }
        cli::Command::Run(run_args) => {
            let passed = run_suite(run_args, &file, env.format.as_deref(), logs).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &file, &env)?;
        }
    }

    Ok(())
}

/// `--config`, then `L2_CONFORMANCE_CONFIG`, then the standard locations
fn load_config(flag: Option<&Path>, env: &EnvConfig) -> Result<ConfigFile> {
    let explicit = flag
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    match explicit {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load spec catalog: {}", path.display())),
        None => Catalog::builtin().context("Built-in catalog is invalid"),
    }
}

fn load_profile(path: Option<&Path>) -> Result<Option<DutProfile>> {
    path.map(|path| {
        DutProfile::load(path)
            .with_context(|| format!("Failed to load DUT profile: {}", path.display()))
    })
    .transpose()
}

/// Tier and sections from the config file, a run profile, then flags
fn resolve_selection(
    selection: &cli::SelectionArgs,
    file: &ConfigFile,
) -> Result<(SamplingTier, Vec<String>, Option<RunProfile>)> {
    let mut tier = file.app.tier;
    let mut sections = file.app.sections.clone();

    let run_profile = match &selection.run_profile {
        Some(name) => {
            let profile = file.run_profile(name).ok_or_else(|| {
                let known: Vec<String> =
                    file.all_run_profiles().into_iter().map(|p| p.name).collect();
                anyhow::anyhow!("Unknown run profile '{}' (known: {})", name, known.join(", "))
            })?;
            tier = profile.tier;
            if !profile.sections.is_empty() {
                sections = profile.sections.clone();
            }
            Some(profile)
        }
        None => None,
    };

    if let Some(value) = &selection.tier {
        tier = SamplingTier::from_str(value)
            .ok_or_else(|| anyhow::anyhow!("Unknown sampling tier: {value}"))?;
    }
    if !selection.section.is_empty() {
        sections = selection.section.clone();
    }
    for section in &sections {
        validate_section(section)?;
    }

    Ok((tier, sections, run_profile))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(value).ok_or_else(|| anyhow::anyhow!("Unknown output format: {value}"))
}

fn list_specs(args: cli::ListArgs, file: &ConfigFile) -> Result<()> {
    let catalog = load_catalog(args.catalog.as_deref().or(file.app.catalog.as_deref()))?;
    if let Some(section) = &args.section {
        validate_section(section)?;
    }

    println!("\nTC8 Layer-2 Specifications ({} total)\n", catalog.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut current_section = String::new();
    for spec in catalog.iter() {
        let section = spec.section();
        if args.section.as_ref().is_some_and(|s| *s != section) {
            continue;
        }
        if section != current_section {
            println!("\n{} {}:", section, section_title(&section));
            println!("──────────────────────────────────────────────────────────────────────");
            current_section = section;
        }

        if args.detailed {
            println!("  {:<18} {:<7} {}", spec.id, spec.clause, spec.title);
            if !spec.description.is_empty() {
                println!("      {}", spec.description);
            }
            let axes: Vec<String> = spec
                .axes
                .iter()
                .map(|a| format!("{}({})", a.kind.name(), a.values.len()))
                .collect();
            if !axes.is_empty() {
                println!("      axes: {}", axes.join(", "));
            }
            if !spec.preconditions.is_empty() {
                println!("      requires: {:?}", spec.preconditions);
            }
            println!("      priority: {:?}", spec.priority);
        } else {
            println!("  {:<18} {:<7} {}", spec.id, spec.clause, spec.title);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

fn show_plan(args: cli::PlanArgs, file: &ConfigFile) -> Result<()> {
    let selection = &args.selection;
    let catalog = load_catalog(selection.catalog.as_deref().or(file.app.catalog.as_deref()))?;
    let profile = match load_profile(selection.profile.as_deref().or(file.app.dut_profile.as_deref()))? {
        Some(profile) => profile,
        None => {
            info!("No DUT profile given; planning against the reference switch");
            DutProfile::reference()
        }
    };
    let (tier, sections, _) = resolve_selection(selection, file)?;

    let entries = catalog.plan(tier, &profile, &sections);
    let format = parse_format(&args.format)?;
    let formatter = ResultFormatter::new(format);
    if matches!(format, OutputFormat::Table | OutputFormat::Summary) {
        println!("Plan for {} ({} tier)", profile.name, tier);
    }
    print!("{}", formatter.format_plan(&entries)?);
    Ok(())
}

fn validate_inputs(args: cli::ValidateArgs, file: &ConfigFile) -> Result<()> {
    let catalog_path = args.catalog.as_deref().or(file.app.catalog.as_deref());
    let catalog = load_catalog(catalog_path)?;
    match catalog_path {
        Some(path) => println!("✓ Catalog is valid: {} ({} specs)", path.display(), catalog.len()),
        None => println!("✓ Built-in catalog is valid ({} specs)", catalog.len()),
    }

    let profile_path = args.profile.as_deref().or(file.app.dut_profile.as_deref());
    match load_profile(profile_path)? {
        Some(profile) => {
            let path = profile_path.map(|p| p.display().to_string()).unwrap_or_default();
            println!(
                "✓ DUT profile is valid: {} ({}, {} ports)",
                path, profile.name, profile.port_count
            );
            for tier in SamplingTier::all() {
                let cases = catalog.expand_all(tier, &profile, &[]);
                let skipped = cases.iter().filter(|c| c.is_placeholder()).count();
                println!("  {:<15} {:>6} cases ({} will skip)", tier.name(), cases.len(), skipped);
            }
        }
        None => println!("  No DUT profile given; skipped profile checks"),
    }

    Ok(())
}

/// Returns whether every case passed
async fn run_suite(
    args: cli::RunArgs,
    file: &ConfigFile,
    env_format: Option<&str>,
    logs: CaseLogs,
) -> Result<bool> {
    if !args.simulate {
        anyhow::bail!(
            "Only the simulated switch is built in; rerun with --simulate, or drive hardware \
             through the DutTransport and DutController traits"
        );
    }

    let mut stopwatch = Stopwatch::new();
    let app = &file.app;
    let selection = &args.selection;

    let format = parse_format(args.format.as_deref().or(env_format).unwrap_or("table"))?;
    let catalog = load_catalog(selection.catalog.as_deref().or(app.catalog.as_deref()))?;
    let profile = match load_profile(selection.profile.as_deref().or(app.dut_profile.as_deref()))? {
        Some(profile) => profile,
        None => DutProfile::reference(),
    };
    let (tier, sections, run_profile) = resolve_selection(selection, file)?;
    let engine_config = engine_config(&args, &app.engine, run_profile.as_ref())?;
    stopwatch.lap("load");

    let requested = match &args.timing_tier {
        Some(value) => TimingTier::from_str(value)
            .ok_or_else(|| anyhow::anyhow!("Unknown timing tier: {value}"))?,
        None => app.timing_tier,
    };
    let capabilities = TimingCapabilities::probe(&app.timing_interfaces);
    let clock = MonotonicClock::for_host(requested, &capabilities);
    let overhead = clock.calibrate(1_000);
    if clock.tier() < requested {
        warn!(
            "Requested {} but the host delivers {}; timing results will be informational",
            requested,
            clock.tier()
        );
    }
    info!("Timing: {} (clock read {:?})", clock.tier(), overhead);
    let clock: Arc<dyn TimingSource> = Arc::new(clock);

    let catalog = Arc::new(catalog);
    let cases = catalog.expand_all(tier, &profile, &sections);
    stopwatch.lap("expand");

    let profile = Arc::new(profile);
    let switch = Arc::new(SimulatedSwitch::new(&profile, clock.clone()));
    info!(
        "Running {} cases against simulated {} ({}, {} workers)",
        cases.len(),
        profile.name,
        engine_config.concurrency,
        engine_config.max_workers
    );

    let runner = CaseRunner::new(
        catalog,
        profile,
        switch.clone(),
        switch,
        clock,
        engine_config,
    )
    .with_log_capture(logs);
    let engine = Engine::new(runner);

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight cases");
            cancel.cancel();
        }
    });

    let streaming = ResultFormatter::new(OutputFormat::Table);
    let report = engine
        .run_to_report_with(cases, |result| {
            if format == OutputFormat::Table {
                println!("{}", streaming.format_result(result));
            }
        })
        .await;
    stopwatch.lap("run");

    let formatter = ResultFormatter::new(format);
    match format {
        OutputFormat::Table => print!("{}", formatter.format_totals(&report)),
        _ => println!("{}", formatter.format_report(&report)?),
    }

    if args.evidence {
        for result in report
            .results
            .iter()
            .filter(|r| matches!(r.classification, Classification::Fail | Classification::Error))
        {
            println!("\n{} ({})", result.case_id, result.classification);
            if let Some(evidence) = &result.evidence {
                print!("{}", formatter.format_evidence(evidence));
            }
            print!("{}", formatter.format_logs(&result.log_entries));
        }
    }

    if let Some(path) = &args.output {
        let file_format = match format {
            OutputFormat::Table => OutputFormat::JsonPretty,
            other => other,
        };
        write_report_to_file(path, &report, file_format)?;
        info!("Report saved to {}", path.display());
    }

    info!("{}", stopwatch.format());
    Ok(report.is_all_passed())
}

/// Engine settings from the config file, a run profile, then flags
fn engine_config(
    args: &cli::RunArgs,
    base: &EngineConfig,
    run_profile: Option<&RunProfile>,
) -> Result<EngineConfig> {
    let mut config = base.clone();
    if let Some(profile) = run_profile {
        if let Some(concurrency) = profile.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(workers) = profile.max_workers {
            config = config.with_workers(workers);
        }
    }
    if args.sequential {
        config = config.with_concurrency(ConcurrencyPolicy::Sequential);
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        config = config.with_workers(workers);
    }
    if let Some(secs) = args.deadline {
        config = config.with_deadline(secs);
    }
    Ok(config)
}

fn manage_config(args: cli::ConfigArgs, file: &ConfigFile, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show { env: show_env, format } => {
            if show_env {
                env.print_summary();
            } else {
                let output = if format == "json" {
                    serde_json::to_string_pretty(file)?
                } else {
                    serde_yaml::to_string(file)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to point at your DUT profile.");
        }

        cli::ConfigAction::Profiles => {
            println!("Run Profiles:");
            println!("{:-<60}", "");
            for profile in file.all_run_profiles() {
                let sections = if profile.sections.is_empty() {
                    "all sections".to_string()
                } else {
                    profile.sections.join(",")
                };
                println!(
                    "  {:<10} {:<15} {:<12} {}",
                    profile.name,
                    profile.tier.name(),
                    sections,
                    profile.description
                );
            }
        }

        cli::ConfigAction::Env => {
            print_env_help();
        }
    }

    Ok(())
}
