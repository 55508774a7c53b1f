//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use log_space_reclaimer::core::config::Config;
use log_space_reclaimer::core::errors::LsrError;
use log_space_reclaimer::daemon::loop_main::{CycleOutcome, ReclaimDaemon};
use log_space_reclaimer::monitor::space::{SpaceMonitor, SpaceThresholds};
use log_space_reclaimer::platform::pal::detect_platform;
use log_space_reclaimer::scanner::classifier::{ClassifierConfig, EntryClassifier, RootEntry};
use log_space_reclaimer::scanner::selector::{EvictionTier, VictimSelector};

/// Log Space Reclaimer: keeps the recorder's log volume above its free-space floor.
#[derive(Debug, Parser)]
#[command(
    name = "lsr",
    author,
    version,
    about = "Log Space Reclaimer - frees space on the driving log volume",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the reclaim loop until SIGTERM/SIGINT.
    Daemon,
    /// Show free space on the log volume and whether reclaim is needed.
    Status,
    /// List log root entries in eviction order.
    Scan,
    /// Run one reclaim pass now.
    Reclaim(ReclaimArgs),
    /// Show or check the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ReclaimArgs {
    /// Report what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML (default).
    Show,
    /// Print the config file path.
    Path,
    /// Load and validate, printing the config hash.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad configuration or arguments.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<LsrError> for CliError {
    fn from(err: LsrError) -> Self {
        match err {
            LsrError::InvalidConfig { .. }
            | LsrError::MissingConfig { .. }
            | LsrError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch a parsed command line.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Daemon => run_daemon(cli),
        Command::Status => run_status(cli),
        Command::Scan => run_scan(cli),
        Command::Reclaim(args) => run_reclaim(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = ReclaimDaemon::init(config)?;
    daemon.run()?;
    Ok(())
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let monitor = SpaceMonitor::new(
        detect_platform()?,
        &config.layout.log_root,
        SpaceThresholds::from_config(&config.reclaim),
    );
    let reading = monitor.sample()?;
    let summary = EntryClassifier::new(ClassifierConfig::from_layout(&config.layout))
        .scan()?
        .summary();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Log Space Reclaimer v{}", env!("CARGO_PKG_VERSION"));
            println!("  Config:   {}", config.paths.config_file.display());
            println!("  Log root: {}", config.layout.log_root.display());
            println!(
                "  Free:     {} of {} ({:.1}%, floor {:.1}%)",
                format_bytes(reading.stats.free_bytes()),
                format_bytes(reading.stats.total_bytes()),
                reading.free_fraction * 100.0,
                config.reclaim.min_free_fraction * 100.0
            );
            println!(
                "  Reclaim:  {}",
                if reading.needs_reclaim {
                    "NEEDED"
                } else {
                    "not needed"
                }
            );
            println!(
                "  Entries:  {} total, {} stray, {} segments ({} preserved, {} locked), {} special",
                summary.total,
                summary.strays,
                summary.segments,
                summary.preserved,
                summary.locked,
                summary.special
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "version": env!("CARGO_PKG_VERSION"),
                "log_root": config.layout.log_root.to_string_lossy(),
                "stats": reading.stats,
                "free_fraction": reading.free_fraction,
                "min_free_fraction": config.reclaim.min_free_fraction,
                "needs_reclaim": reading.needs_reclaim,
                "entries": summary,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_scan(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let classified = EntryClassifier::new(ClassifierConfig::from_layout(&config.layout)).scan()?;
    let selector = VictimSelector::new();
    let candidates = selector.candidates(&classified);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Eviction order for {}:", classified.root.display());
            if candidates.is_empty() {
                println!("  (nothing eligible)");
            }
            for (rank, candidate) in candidates.iter().enumerate() {
                println!(
                    "  {:>4}  {:<12}  {:<24}  {}",
                    rank + 1,
                    candidate.tier.label(),
                    candidate.entry.label(),
                    candidate.entry.name
                );
            }
            let locked: Vec<&RootEntry> =
                classified.entries.iter().filter(|e| e.is_locked()).collect();
            if !locked.is_empty() {
                println!("\nLocked (never deleted):");
                for entry in locked {
                    println!("        {:<12}  {:<24}  {}", "locked", entry.label(), entry.name);
                }
            }
        }
        OutputMode::Json => {
            let entries: Vec<Value> = classified
                .entries
                .iter()
                .map(|entry| {
                    json!({
                        "name": entry.name,
                        "path": entry.path.to_string_lossy(),
                        "kind": entry.kind,
                        "tier": EvictionTier::of(entry),
                    })
                })
                .collect();
            let payload = json!({
                "command": "scan",
                "log_root": classified.root.to_string_lossy(),
                "summary": classified.summary(),
                "eviction_order": candidates
                    .iter()
                    .map(|c| c.entry.name.as_str())
                    .collect::<Vec<_>>(),
                "entries": entries,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_reclaim(cli: &Cli, args: &ReclaimArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    config.reclaim.dry_run |= args.dry_run;
    let dry_run = config.reclaim.dry_run;

    let mut daemon = ReclaimDaemon::init(config)?;
    let report = daemon.run_cycle();
    daemon.shutdown("one-shot reclaim");

    match output_mode(cli) {
        OutputMode::Human => {
            let verb = if dry_run { "would delete" } else { "deleted" };
            for path in &report.deleted {
                println!("  {verb}  {}", path.display());
            }
            for path in &report.failed {
                println!("  failed   {}", path.display());
            }
            println!(
                "Outcome: {} ({} {verb}, {} failed{})",
                outcome_label(report.outcome),
                report.deleted.len(),
                report.failed.len(),
                report
                    .free_fraction
                    .map_or_else(String::new, |f| format!(", {:.1}% free", f * 100.0))
            );
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&report)?;
            if let Value::Object(map) = &mut payload {
                map.insert("command".to_string(), json!("reclaim"));
                map.insert("dry_run".to_string(), json!(dry_run));
            }
            write_json_line(&payload)?;
        }
    }

    match report.outcome {
        CycleOutcome::StatsUnavailable => Err(CliError::Runtime(
            "volume stats unavailable; nothing deleted".to_string(),
        )),
        CycleOutcome::ScanFailed => Err(CliError::Runtime(format!(
            "could not list log root; {} entries deleted",
            report.deleted.len()
        ))),
        _ => Ok(()),
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
        }
        ConfigCommand::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
        }
        ConfigCommand::Validate => {
            let config = load_config(cli)?;
            let hash = config.stable_hash()?;
            match output_mode(cli) {
                OutputMode::Human => println!("configuration valid (hash {hash})"),
                OutputMode::Json => write_json_line(&json!({
                    "command": "config validate",
                    "valid": true,
                    "hash": hash,
                }))?,
            }
        }
    }
    Ok(())
}

// ──────────────────── output helpers ────────────────────

const fn outcome_label(outcome: CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::SpaceOk => "space ok",
        CycleOutcome::Reclaimed => "reclaimed",
        CycleOutcome::Exhausted => "exhausted (nothing eligible left)",
        CycleOutcome::StatsUnavailable => "stats unavailable",
        CycleOutcome::ScanFailed => "scan failed",
        CycleOutcome::Stopped => "stopped",
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LSR_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ if stdout_is_tty => OutputMode::Human,
        _ => OutputMode::Json,
    }
}
