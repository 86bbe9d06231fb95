//! ahab-verify: run every validator in a directory and report the result.
//!
//! Usage:
//!   ahab-verify run
//!   ahab-verify run --parallel --output json --timeout 10
//!   ahab-verify list
//!   ahab-verify last-run
//!
//! Exit codes: 0 pass, 1 fail, 2 passed with warnings, 3 infrastructure
//! failure. The tool follows the validator exit-code convention, so it can
//! itself be used as a validator.

use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ahab_contracts::{error::AhabResult, report::ReportFormat};
use ahab_core::{FileConfig, Orchestrator, Overrides, RegistryEntry, Settings, ValidatorRegistry};
use ahab_report::{render, summary_line, write_report, ReportStyle};
use ahab_state::{recover, FileStateRecorder};

/// Exit code for failures of the tool itself.
const EXIT_INFRASTRUCTURE: u8 = 3;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Verification orchestrator.
///
/// Discovers `validate-<name>` executables, runs each under a timeout and
/// aggregates their exit codes into a single verdict.
#[derive(Parser)]
#[command(
    name = "ahab-verify",
    version,
    about = "Run validators under bounded timeouts and aggregate the verdict",
    long_about = "Runs every validate-<name> executable in the validators directory, maps\n\
                  exit codes 0/1/2/other to PASS/FAIL/WARN/ERROR and reports the run as\n\
                  text, JSON or Markdown."
)]
struct Cli {
    /// Config file (default: ahab-verify.toml in the working directory, if present).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the validators and report.
    Run(RunArgs),
    /// List discovered validators without running them.
    List {
        #[arg(long, value_name = "DIR")]
        validators_dir: Option<PathBuf>,
    },
    /// Explain how the previous run ended.
    LastRun {
        #[arg(long, value_name = "PATH")]
        state_file: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run all validators concurrently.
    #[arg(long)]
    parallel: bool,

    /// Report format: text, json or markdown.
    #[arg(long, short = 'o', value_name = "FORMAT")]
    output: Option<ReportFormat>,

    /// Per-validator timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds between the termination signal and the forced kill.
    #[arg(long, value_name = "SECS")]
    grace: Option<u64>,

    /// Treat warnings as failures.
    #[arg(long)]
    strict: bool,

    /// Also write the rendered report to this file.
    #[arg(long, value_name = "PATH")]
    report_file: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    validators_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// Run only these validators (repeatable or comma separated).
    #[arg(long, value_name = "NAME", value_delimiter = ',')]
    only: Vec<String>,

    /// Disable ANSI colors in the text report.
    #[arg(long)]
    no_color: bool,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            validators_dir: self.validators_dir.clone(),
            state_file: self.state_file.clone(),
            timeout_secs: self.timeout,
            grace_secs: self.grace,
            parallel: self.parallel.then_some(true),
            strict: self.strict.then_some(true),
            output: self.output,
            report_file: self.report_file.clone(),
            only: self.only.clone(),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only the report. RUST_LOG=debug for
    // verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Run(args) => cmd_run(cli.config.as_deref(), args),
        Command::List { validators_dir } => cmd_list(cli.config.as_deref(), validators_dir.clone()),
        Command::LastRun { state_file } => cmd_last_run(cli.config.as_deref(), state_file.clone()),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ahab-verify: {e}");
            ExitCode::from(EXIT_INFRASTRUCTURE)
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_run(config: Option<&Path>, args: &RunArgs) -> AhabResult<u8> {
    let settings = Settings::resolve(FileConfig::discover(config)?, args.overrides())?;

    explain_previous_run(&settings.state_file);

    let mut registry = ValidatorRegistry::discover(&settings.validators_dir)?;
    if !settings.only.is_empty() {
        registry = registry.select(&settings.only);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let recorder = Arc::new(FileStateRecorder::init(&settings.state_file, run_id.clone())?);

    let echo = settings.output == ReportFormat::Text;
    let orchestrator = Orchestrator::new(settings.orchestrator_config(echo), recorder);
    let report = orchestrator.run_with_id(&run_id, &registry)?;

    let style = ReportStyle {
        color: use_color(args.no_color),
        show_state_log: true,
    };
    let summary = summary_line(&report);

    let rendered = match render(&report, settings.output, &style) {
        Ok(rendered) => rendered,
        Err(e) => {
            eprintln!("{summary}");
            return Err(e);
        }
    };
    if echo {
        println!();
    }
    print!("{rendered}");
    if !echo {
        // Keep stdout parseable; the summary still reaches the console.
        eprintln!("{summary}");
    }

    if let Some(path) = &settings.report_file {
        let contents = if style.color && settings.output == ReportFormat::Text {
            render(&report, settings.output, &ReportStyle { color: false, ..style })?
        } else {
            rendered
        };
        write_report(path, &contents)?;
    }

    info!(run_id = %run_id, verdict = %report.verdict, "run complete");
    Ok(exit_code(report.verdict.exit_code()))
}

fn cmd_list(config: Option<&Path>, validators_dir: Option<PathBuf>) -> AhabResult<u8> {
    let overrides = Overrides { validators_dir, ..Overrides::default() };
    let settings = Settings::resolve(FileConfig::discover(config)?, overrides)?;
    let registry = ValidatorRegistry::discover(&settings.validators_dir)?;

    println!(
        "{} validator(s) in {}",
        registry.len(),
        settings.validators_dir.display()
    );
    for entry in registry.entries() {
        match entry {
            RegistryEntry::Ready(_) => println!("  ✓ {}", entry.name()),
            RegistryEntry::Skipped { name, reason } => println!("  ○ {name} (skipped: {reason})"),
        }
    }
    Ok(0)
}

fn cmd_last_run(config: Option<&Path>, state_file: Option<PathBuf>) -> AhabResult<u8> {
    let overrides = Overrides { state_file, ..Overrides::default() };
    let settings = Settings::resolve(FileConfig::discover(config)?, overrides)?;

    match recover(&settings.state_file)? {
        None => {
            println!("no previous run recorded in {}", settings.state_file.display());
            Ok(0)
        }
        Some(recovery) => {
            println!("{recovery}");
            if let Some(at) = recovery.last_timestamp {
                println!("  last entry at {}", at.to_rfc3339());
            }
            println!("  {} event(s) in the log tail", recovery.events);
            Ok(if recovery.clean_exit && recovery.intact { 0 } else { 1 })
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Surface an unclean or tampered previous run before starting a new one.
fn explain_previous_run(state_file: &Path) {
    match recover(state_file) {
        Ok(Some(previous)) if !previous.clean_exit || !previous.intact => {
            eprintln!("note: {previous}");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not inspect previous state log"),
    }
}

fn use_color(no_color: bool) -> bool {
    !no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

fn exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_INFRASTRUCTURE)
}
