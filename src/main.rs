#![forbid(unsafe_code)]

//! `handoff` binary.
//!
//! Loads `handoff.toml`, runs the configured scripts through the session
//! run loop, and writes the archives and a `run.json` summary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use handoff::archive::bundle::BundleArchiver;
use handoff::config::{Overrides, DEFAULT_CONFIG_FILE};
use handoff::models::outcome::{ExecutionMode, RunOutcome};
use handoff::models::task::TaskState;
use handoff::orchestrator::path_env::augmented_process_path;
use handoff::orchestrator::run_loop;
use handoff::orchestrator::session::SessionContext;
use handoff::ui::line::LineUi;
use handoff::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "handoff", about = "Run repository scripts and bundle the results", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured scripts, then build the archives.
    Run(RunArgs),
    /// List the configured scripts.
    Scripts(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Repository root (defaults to the current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Path to the TOML configuration file (defaults to `<cwd>/handoff.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    location: ConfigArgs,

    /// Dispatch mode override.
    #[arg(long, value_enum)]
    mode: Option<ExecutionMode>,

    /// Skip the archive stage.
    #[arg(long)]
    no_archive: bool,

    /// Capture `q`/`r` + Enter from the terminal to cancel or restart.
    #[arg(long)]
    live: bool,

    /// Seconds of silence before a hang warning (0 disables).
    #[arg(long)]
    hang_warn: Option<u64>,

    /// Seconds of silence before a hung script is terminated (0 disables).
    #[arg(long)]
    hang_kill: Option<u64>,

    /// Seconds between the soft terminate and the force kill.
    #[arg(long)]
    hang_kill_grace: Option<u64>,

    /// Append one marker per finished script to this file.
    #[arg(long)]
    order_file: Option<PathBuf>,

    /// Run only these scripts (repeatable).
    #[arg(long = "only")]
    only: Vec<String>,
}

/// Summary written to `<output-dir>/run.json`.
#[derive(Debug, Serialize)]
struct RunSummary {
    exit_code: i32,
    outcome: RunOutcome,
    tasks: Vec<TaskRow>,
}

#[derive(Debug, Serialize)]
struct TaskRow {
    id: String,
    state: TaskState,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(args.command)) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            error!(%err, "handoff failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run(args) => run(args).await,
        Command::Scripts(args) => {
            let (_, config) = load(&args)?;
            for script in &config.scripts {
                println!("{}\t{}", script.key, script.command);
            }
            Ok(0)
        }
    }
}

fn load(args: &ConfigArgs) -> Result<(PathBuf, GlobalConfig)> {
    let cwd = match &args.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()?,
    };
    let cwd = cwd
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid repository root: {err}")))?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_FILE));
    let config = GlobalConfig::load_from_path(&config_path)?;
    info!(config = %config_path.display(), scripts = config.scripts.len(), "configuration loaded");
    Ok((cwd, config))
}

async fn run(args: RunArgs) -> Result<i32> {
    let (cwd, config) = load(&args.location)?;
    let overrides = Overrides {
        mode: args.mode,
        no_archive: args.no_archive,
        live: args.live,
        hang_warn: args.hang_warn,
        hang_kill: args.hang_kill,
        hang_kill_grace: args.hang_kill_grace,
        order_file: args.order_file,
        only: args.only,
    };
    let tasks = config.select_scripts(&overrides.only)?;
    let behavior = config.behavior(&overrides);
    let mode = overrides.mode.unwrap_or(config.mode);
    let path_env = augmented_process_path(&cwd, &config.bin_dirs)?;

    let ui = Arc::new(LineUi::stderr(behavior.live));
    let board = ui.board();
    let ctx = SessionContext::new(
        cwd,
        Arc::new(config),
        tasks,
        behavior,
        ui,
        Arc::new(BundleArchiver),
    )
    .with_mode(mode)
    .with_path_env(path_env)
    .with_signals(true);

    let outcome = run_loop::run(&ctx).await?;
    let exit_code = ctx.exit_code.code();

    for artifact in &outcome.created_artifacts {
        println!("{}", artifact.display());
    }

    let summary = RunSummary {
        exit_code,
        outcome,
        tasks: board
            .snapshot()
            .into_iter()
            .map(|(id, state)| TaskRow { id, state })
            .collect(),
    };
    write_summary(&ctx.output_dir, &summary)?;

    Ok(exit_code)
}

fn write_summary(output_dir: &Path, summary: &RunSummary) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join("run.json");
    std::fs::write(&path, serde_json::to_vec_pretty(summary)?)?;
    info!(path = %path.display(), "run summary written");
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
