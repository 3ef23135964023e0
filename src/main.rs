use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use upgradekit::{
    CatalogDocument, ChangeSetCatalog, DEFAULT_TABLES, RunReport, StateBackend, StoreSet,
    UpgradeConfig, Upgrader, VersionGraph, VersionId, VersionResolver,
};

#[derive(Parser)]
#[command(name = "upgradekit")]
#[command(about = "Staged upgrades with compensating rollback over a JSON state document")]
#[command(
    after_help = "Exit status of run/run-all: 0 success, 1 rolled back, 2 no upgrade path, 255 catastrophic."
)]
struct Cli {
    /// State document holding settings, tables, schema and the recorded version
    #[arg(long, default_value = "upgradekit-state.json")]
    state: PathBuf,

    /// Changeset catalog (versions and changesets)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Upgrade configuration (maintenance flag, lease)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keyed tables changesets may add entries to
    #[arg(long = "table", default_values_t = DEFAULT_TABLES.map(String::from))]
    tables: Vec<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the recorded version and what the catalog offers
    Describe,
    /// List the stages the next hop would run, without running them
    Plan {
        #[arg(long)]
        from: Option<String>,
    },
    /// Run the next hop
    Run {
        #[arg(long)]
        from: Option<String>,
    },
    /// Run hops until the latest version or the first hop that does not succeed
    RunAll,
    /// Remove the marker left by a catastrophic run
    ClearInconsistency,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Describe => {
            let upgrader = open_upgrader(&cli)?;
            let report = upgrader.describe_versions()?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("current:   {}", display_opt(report.current.as_ref()));
                println!("next:      {}", display_opt(report.next.as_ref()));
                println!("available: {}", display_opt(report.available.as_ref()));
                let known: Vec<&str> = report.all_known_versions.iter().map(VersionId::as_str).collect();
                println!("known:     {}", known.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Plan { from } => {
            let upgrader = open_upgrader(&cli)?;
            let current = starting_version(&upgrader, from.as_deref())?;
            let plan = upgrader.plan(&current)?;
            if cli.json {
                print_json(&plan)?;
            } else {
                match plan {
                    Some(plan) => {
                        println!("{} -> {}", plan.from, plan.to);
                        for (i, stage) in plan.stages.iter().enumerate() {
                            println!("  {:>2}. {}", i + 1, stage);
                        }
                    }
                    None => println!("{}: no upgrade path", current),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { from } => {
            let upgrader = open_upgrader(&cli)?;
            let current = starting_version(&upgrader, from.as_deref())?;
            let report = upgrader
                .run_upgrade_report(&current)
                .with_context(|| format!("Upgrade from {} aborted before any stage ran", current))?;
            print_reports(&cli, std::slice::from_ref(&report))?;
            Ok(exit_code(report.code()))
        }
        Command::RunAll => {
            let upgrader = open_upgrader(&cli)?;
            let reports = upgrader.run_to_latest().context("Upgrade aborted")?;
            print_reports(&cli, &reports)?;
            let code = reports.last().map(RunReport::code).unwrap_or(0);
            Ok(exit_code(code))
        }
        Command::ClearInconsistency => {
            let upgrader = open_upgrader(&cli)?;
            match upgrader.clear_inconsistency()? {
                Some(marker) if cli.json => print_json(&marker)?,
                Some(marker) => println!(
                    "cleared marker of run {} ({} -> {})",
                    marker.run_id, marker.from_version, marker.to_version
                ),
                None => println!("no inconsistency marker"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_state(cli: &Cli) -> Result<StateBackend> {
    StateBackend::open(&cli.state)
        .with_context(|| format!("Failed to open state '{}'", cli.state.display()))
}

fn open_upgrader(cli: &Cli) -> Result<Upgrader> {
    let (resolver, catalog) = match (&cli.catalog, &cli.command) {
        (Some(path), _) => CatalogDocument::from_json_file(path)
            .and_then(CatalogDocument::into_parts)
            .with_context(|| format!("Invalid catalog '{}'", path.display()))?,
        // clearing the marker needs no versions
        (None, Command::ClearInconsistency) => {
            (VersionResolver::new(VersionGraph::new()), ChangeSetCatalog::new())
        }
        (None, _) => return Err(anyhow!("--catalog is required for this command")),
    };

    let config = match &cli.config {
        Some(path) => UpgradeConfig::from_json_file(path)
            .with_context(|| format!("Invalid config '{}'", path.display()))?,
        None => UpgradeConfig::default(),
    };

    let backend = open_state(cli)?;
    let tables: Vec<&str> = cli.tables.iter().map(String::as_str).collect();
    let stores = StoreSet::from_backend(&backend, &tables);
    Ok(Upgrader::new(stores, resolver, catalog)?.with_config(config)?)
}

fn starting_version(upgrader: &Upgrader, from: Option<&str>) -> Result<VersionId> {
    match from {
        Some(raw) => Ok(VersionId::parse(raw)?),
        None => upgrader
            .describe_versions()?
            .current
            .ok_or_else(|| anyhow!("No version recorded in the state; pass --from")),
    }
}

fn print_reports(cli: &Cli, reports: &[RunReport]) -> Result<()> {
    if cli.json {
        return print_json(&reports);
    }
    for report in reports {
        println!(
            "{} -> {}: {} ({})",
            report.from,
            display_opt(report.to.as_ref()),
            report.outcome,
            report.code()
        );
        if let Some(stage) = &report.failed_stage {
            println!("  failed stage:        {}", stage);
        }
        if let Some(stage) = &report.failed_compensation {
            println!("  failed compensation: {}", stage);
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_opt(version: Option<&VersionId>) -> String {
    version.map(ToString::to_string).unwrap_or_else(|| "-".to_string())
}

/// Process exit statuses are one byte; -1 becomes 255.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}
