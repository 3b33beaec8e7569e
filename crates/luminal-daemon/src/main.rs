//! Luminal daemon CLI
//!
//! `luminal run` tails a chat-log directory and maintains the persistent
//! memory state; the other subcommands inspect and manage that state.
//!
//! Exit codes: 0 success, 2 configuration error, 3 state-lock
//! contention, 4 unrecoverable schema mismatch, 5 fatal I/O, 1 other.

mod orchestrator;

use std::io;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use luminal_core::{
    CheckpointManager, CheckpointTrigger, Config, EngineError, MemoryEngine, Result, StateDir,
};

/// Luminal - persistent conversational memory engine
#[derive(Parser)]
#[command(name = "luminal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent conversational memory engine")]
#[command(
    long_about = "Luminal watches a directory of append-only chat logs, distills every message \
into emotional and semantic state, maintains a four-scale temporal memory with \
Ebbinghaus-style retention, and keeps a session-startup briefing current on disk."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in the foreground
    Run {
        /// State directory (default: $STATE_DIR or the platform data dir)
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Directory of append-only message logs (default: $WATCH_DIR)
        #[arg(long)]
        watch_dir: Option<PathBuf>,
        /// TOML configuration file (default: $CONFIG_PATH)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Promote a specific checkpoint to the restore point
    Restore {
        /// Checkpoint id, as printed by list-checkpoints
        #[arg(long)]
        checkpoint_id: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the checkpoint index
    ListCheckpoints {
        #[arg(long)]
        state_dir: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Regenerate the briefing once and write it to a path
    ExportBriefing {
        /// Output path for the briefing copy
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        state_dir: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let code = match dispatch(cli) {
        Ok(()) => 0,
        Err(e) => {
            error!(kind = ?e, "fatal: {e}");
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Logging to stderr; `LOG_LEVEL` wins, then `RUST_LOG`, then info.
fn init_tracing() {
    let filter = match std::env::var("LOG_LEVEL") {
        Ok(level) if !level.is_empty() => EnvFilter::new(level),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            state_dir,
            watch_dir,
            config,
        } => run_foreground(state_dir, watch_dir, config),
        Commands::Restore {
            checkpoint_id,
            state_dir,
            config,
        } => run_restore(checkpoint_id, state_dir, config),
        Commands::ListCheckpoints { state_dir, config } => run_list(state_dir, config),
        Commands::ExportBriefing {
            out,
            state_dir,
            config,
        } => run_export(out, state_dir, config),
    }
}

fn run_foreground(
    state_dir: Option<PathBuf>,
    watch_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let state_root = StateDir::resolve_root(state_dir)?;
    let watch_dir = resolve_watch_dir(watch_dir)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(orchestrator::run(config, state_root, watch_dir))
}

fn run_restore(
    checkpoint_id: String,
    state_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let state_root = StateDir::resolve_root(state_dir)?;
    let mut state = StateDir::open(&state_root)?;
    state.lock()?;

    let mut manager = CheckpointManager::open(config.checkpoint.clone(), state.checkpoints_dir())?;
    let mut restored = manager.restore_by_id(&checkpoint_id)?;

    // Re-emit the restored state as the newest checkpoint so the next
    // run starts from it.
    restored.created_at = Utc::now();
    restored.trigger = CheckpointTrigger::Manual;
    let id = manager.write(&restored)?;

    println!(
        "{} {} {} {}",
        "restored".green().bold(),
        checkpoint_id,
        "as".dimmed(),
        id
    );
    Ok(())
}

fn run_list(state_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let state_root = StateDir::resolve_root(state_dir)?;
    let state = StateDir::open(&state_root)?;
    let manager = CheckpointManager::open(config.checkpoint.clone(), state.checkpoints_dir())?;

    if manager.index().is_empty() {
        println!("{}", "no checkpoints yet".dimmed());
        return Ok(());
    }

    println!("{}", "=== Checkpoints ===".cyan().bold());
    for entry in manager.index() {
        println!(
            "{}  {}  {}",
            entry.id.white().bold(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.trigger.as_str().dimmed()
        );
    }
    Ok(())
}

fn run_export(
    out: PathBuf,
    state_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let state_root = StateDir::resolve_root(state_dir)?;
    let mut state = StateDir::open(&state_root)?;
    state.lock()?;

    let analyzer = orchestrator::build_analyzer(&config);
    let mut engine = MemoryEngine::open(config, state, analyzer)?;
    engine.project(Utc::now())?;

    let briefing = engine.state_dir().briefing_path();
    std::fs::copy(&briefing, &out)?;
    println!(
        "{} {}",
        "briefing written to".green().bold(),
        out.display()
    );
    Ok(())
}

fn resolve_watch_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("WATCH_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Err(EngineError::Config(
        "no watch directory: pass --watch-dir or set WATCH_DIR".to_string(),
    ))
}
