//! quell - pause and restore per-day quotas on a schedule.
//!
//! Thin CLI over quell-core: wires the file-backed host, the SQLite
//! primary and JSON backup backends, and the calendar trigger together,
//! and guarantees at most one reconciliation pass runs at a time by
//! holding an exclusive file lock for the duration of a pass.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fs2::FileExt;
use tracing::debug;

use quell_core::backends::{JsonFileBackend, SqliteBackend};
use quell_core::host::JsonFileHost;
use quell_core::logging::init_logging;
use quell_core::trigger::{ScheduleTrigger, TriggerEvaluator};
use quell_core::{ApplyEngine, ErrorReporter, Mode, RedundantStore, Summary};

mod config;
mod state;

use config::QuellConfig;
use state::CliState;

/// quell - scheduled quota override with guaranteed restore
#[derive(Parser, Debug)]
#[command(name = "quell")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "quell.toml")]
    config: PathBuf,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate the schedule and run one reconciliation pass
    Reconcile,

    /// Force a mode, bypassing the schedule
    Apply {
        /// Mode to apply
        mode: ModeArg,
    },

    /// Show stored originals and pass state
    Status,

    /// Toggle travel mode (override active regardless of weekday)
    Travel {
        /// New travel mode setting
        switch: SwitchArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Override,
    Inactive,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Override => Self::Override,
            ModeArg::Inactive => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SwitchArg {
    On,
    Off,
}

/// Exclusive lock held for the duration of a reconciliation pass. A
/// second invocation fails fast instead of interleaving with a pass in
/// flight.
struct PassLock {
    _file: std::fs::File,
}

impl PassLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        file.try_lock_exclusive()
            .context("another reconciliation pass is already running")?;
        debug!(path = %path.display(), "pass lock acquired");
        Ok(Self { _file: file })
    }
}

fn open_store(config: &QuellConfig) -> Result<RedundantStore> {
    let primary = SqliteBackend::open(&config.primary_db)
        .with_context(|| format!("opening primary database {}", config.primary_db.display()))?;
    let backup = JsonFileBackend::new(&config.backup_file);
    Ok(RedundantStore::new(Box::new(primary), Box::new(backup)))
}

fn run_pass(config: &QuellConfig, forced: Option<Mode>, json: bool) -> Result<Summary> {
    let _lock = PassLock::acquire(&config.state_file.with_extension("lock"))?;
    let mut state = CliState::load(&config.state_file)?;

    let desired = match forced {
        Some(mode) => mode,
        None => {
            ScheduleTrigger::new(config.pause_weekdays()?, config.travel_mode).desired_mode()
        }
    };

    let mut host = JsonFileHost::new(&config.groups_file);
    let mut engine = ApplyEngine::new(open_store(config)?);
    engine.set_zero_watch(state.zero_watch.clone());

    let summary = engine.reconcile(&mut host, desired, state.last_applied_mode);

    state.last_applied_mode = Some(desired);
    state.zero_watch = engine.zero_watch().clone();
    state.save(&config.state_file)?;

    print_summary(desired, &summary, json)?;
    Ok(summary)
}

fn print_summary(applied: Mode, summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    // Unrecoverable groups come first; everything else is detail.
    if !summary.unrecoverable.is_empty() {
        println!("NEEDS MANUAL FIX (quota is 0 but no original is stored):");
        for group_id in &summary.unrecoverable {
            println!("  {group_id}");
        }
    }
    println!(
        "mode {applied}: {} updated, {} skipped, {} deferred, {} failed",
        summary.succeeded.len(),
        summary.skipped.len(),
        summary.deferred.len(),
        summary.failed.len(),
    );
    for failure in &summary.failed {
        println!("  failed {}: {}", failure.group_id, failure.message);
    }
    for note in &summary.notes {
        println!("  note: {note}");
    }
    if summary.drift_detected {
        println!("  mode drift detected; live state won");
    }
    Ok(())
}

fn show_status(config: &QuellConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let state = CliState::load(&config.state_file)?;
    let mut reporter = ErrorReporter::new();
    let records = store.snapshot(&mut reporter);

    if json {
        let status = serde_json::json!({
            "last_applied_mode": state.last_applied_mode,
            "travel_mode": config.travel_mode,
            "stored_originals": records
                .iter()
                .map(|(group_id, record)| {
                    (group_id.clone(), serde_json::json!({
                        "value": record.value,
                        "captured_by": record.captured_by,
                    }))
                })
                .collect::<serde_json::Map<_, _>>(),
            "zero_watch": state.zero_watch,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match state.last_applied_mode {
        Some(mode) => println!("last applied mode: {mode}"),
        None => println!("last applied mode: unknown (no pass recorded)"),
    }
    println!("travel mode: {}", if config.travel_mode { "on" } else { "off" });
    if records.is_empty() {
        println!("stored originals: none");
    } else {
        println!("stored originals:");
        for (group_id, record) in &records {
            println!(
                "  {group_id}: {} (captured while {})",
                record.value, record.captured_by
            );
        }
    }
    if !state.zero_watch.is_empty() {
        println!("watching (quota 0, no record yet):");
        for group_id in &state.zero_watch {
            println!("  {group_id}");
        }
    }
    Ok(())
}

fn set_travel(config_path: &Path, switch: SwitchArg) -> Result<()> {
    let mut config = QuellConfig::load(config_path)?;
    config.travel_mode = matches!(switch, SwitchArg::On);
    config.save(config_path)?;
    println!(
        "travel mode {}; run `quell reconcile` to apply",
        if config.travel_mode { "on" } else { "off" }
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = QuellConfig::load(&cli.config)?;
    init_logging(&config.log)?;

    match cli.command {
        Commands::Reconcile => {
            let summary = run_pass(&config, None, cli.json)?;
            if !summary.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Apply { mode } => {
            let summary = run_pass(&config, Some(mode.into()), cli.json)?;
            if !summary.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Status => show_status(&config, cli.json)?,
        Commands::Travel { switch } => set_travel(&cli.config, switch)?,
    }
    Ok(())
}
