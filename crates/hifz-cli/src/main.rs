mod input;
mod server;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hifz_core::{EngineError, LearnerProfile, SessionController, Timestamp, now_unix_secs};
use hifz_store::{CONFIG_FILE, Store, StoreError, default_data_dir, load_config};
use rmcp::{ServiceExt, transport::stdio};
use serde::Serialize;
use uuid::Uuid;

use crate::input::{ContentMap, read_content, read_events};

/// Exit status when the data directory or database cannot be reached.
const EXIT_UNAVAILABLE: u8 = 3;

#[derive(Parser)]
#[command(name = "hifz", about = "Retention scheduler for Qur'an memorization")]
struct Cli {
    /// Data directory (defaults to $HIFZ_DATA_DIR, then ~/.hifz)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Evaluate as of this Unix timestamp instead of the current time
    #[arg(long, global = true)]
    at: Option<Timestamp>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve {
        /// JSON array of {verse, text, translation?} attached to steps
        #[arg(long)]
        content: Option<PathBuf>,
    },

    /// Enroll a new learner
    Enroll {
        learner: String,

        /// Daily study budget in minutes
        #[arg(long)]
        minutes: Option<u32>,

        /// Local day offset from UTC, in minutes
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i32>,

        /// First verse to memorize
        #[arg(long)]
        cursor: Option<u32>,
    },

    /// Open today's session (or show the one already open)
    Start {
        learner: String,

        /// JSON array of {verse, text, translation?} attached to steps
        #[arg(long)]
        content: Option<PathBuf>,
    },

    /// Evaluate the warm-up gate from a JSON file of events
    Warmup {
        learner: String,
        session: Uuid,
        #[arg(long)]
        events: PathBuf,
    },

    /// Complete a session from a JSON file of events
    Complete {
        learner: String,
        session: Uuid,
        #[arg(long)]
        events: PathBuf,
    },

    /// Record passive reading time
    Browse { learner: String, seconds: u32 },

    /// Show the learner's daily streak
    Streak { learner: String },

    /// Show the learner's progress summary
    Status { learner: String },
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone().unwrap_or_else(default_data_dir)
}

fn open_controller(cli: &Cli, content: ContentMap) -> Result<SessionController<Store, ContentMap>> {
    let dir = data_dir(cli);
    let config = load_config(&dir.join(CONFIG_FILE)).context("failed to load engine config")?;
    let store = Store::open_data_dir(&dir)
        .map_err(EngineError::from)
        .with_context(|| format!("failed to open store in {}", dir.display()))?;
    tracing::debug!("using data directory {}", dir.display());
    Ok(SessionController::new(store, config).with_content(content))
}

fn now(cli: &Cli) -> Timestamp {
    cli.at.unwrap_or_else(now_unix_secs)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn is_unavailable(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .is_some_and(EngineError::is_unavailable)
            || matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::Unavailable(_)))
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Serve { content } => cmd_serve(&cli, content.as_deref()).await,
        Commands::Enroll {
            learner,
            minutes,
            offset,
            cursor,
        } => cmd_enroll(&cli, learner, *minutes, *offset, *cursor),
        Commands::Start { learner, content } => cmd_start(&cli, learner, content.as_deref()),
        Commands::Warmup {
            learner,
            session,
            events,
        } => cmd_warmup(&cli, learner, *session, events),
        Commands::Complete {
            learner,
            session,
            events,
        } => cmd_complete(&cli, learner, *session, events),
        Commands::Browse { learner, seconds } => cmd_browse(&cli, learner, *seconds),
        Commands::Streak { learner } => cmd_streak(&cli, learner),
        Commands::Status { learner } => cmd_status(&cli, learner),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_unavailable(&e) => {
            eprintln!("hifz: scheduler unavailable: {e:#}");
            ExitCode::from(EXIT_UNAVAILABLE)
        }
        Err(e) => {
            eprintln!("hifz: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_serve(cli: &Cli, content: Option<&Path>) -> Result<()> {
    let controller = open_controller(cli, read_content(content)?)?;
    tracing::info!("starting MCP server on {}", data_dir(cli).display());

    let service = server::HifzServer::new(controller)
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;
    Ok(())
}

fn cmd_enroll(
    cli: &Cli,
    learner: &str,
    minutes: Option<u32>,
    offset: Option<i32>,
    cursor: Option<u32>,
) -> Result<()> {
    let mut controller = open_controller(cli, ContentMap::new())?;
    let mut profile = LearnerProfile::new(learner, controller.config());
    if let Some(minutes) = minutes {
        profile = profile.with_daily_minutes(minutes);
    }
    if let Some(offset) = offset {
        profile = profile.with_offset(offset);
    }
    if let Some(cursor) = cursor {
        profile = profile.with_cursor(cursor);
    }
    let profile = controller
        .enroll(profile)
        .with_context(|| format!("failed to enroll '{learner}'"))?;
    print_json(&profile)
}

fn cmd_start(cli: &Cli, learner: &str, content: Option<&Path>) -> Result<()> {
    let mut controller = open_controller(cli, read_content(content)?)?;
    let view = controller
        .start_session(learner, now(cli))
        .context("failed to start session")?;
    print_json(&view)
}

fn cmd_warmup(cli: &Cli, learner: &str, session: Uuid, events: &Path) -> Result<()> {
    let (events, malformed) = read_events(events)?;
    let mut controller = open_controller(cli, ContentMap::new())?;
    let mut checkpoint = controller
        .checkpoint_warmup(learner, session, &events, now(cli))
        .context("failed to evaluate warm-up")?;
    checkpoint.dropped_events += malformed;
    print_json(&checkpoint)
}

fn cmd_complete(cli: &Cli, learner: &str, session: Uuid, events: &Path) -> Result<()> {
    let (events, malformed) = read_events(events)?;
    let mut controller = open_controller(cli, ContentMap::new())?;
    let mut report = controller
        .complete_session(learner, session, &events, now(cli))
        .context("failed to complete session")?;
    report.dropped_events += malformed;
    print_json(&report)
}

fn cmd_browse(cli: &Cli, learner: &str, seconds: u32) -> Result<()> {
    let mut controller = open_controller(cli, ContentMap::new())?;
    controller
        .record_browse(learner, seconds, now(cli))
        .context("failed to record browse time")?;
    print_json(&serde_json::json!({ "learner_id": learner, "recorded_seconds": seconds }))
}

fn cmd_streak(cli: &Cli, learner: &str) -> Result<()> {
    let controller = open_controller(cli, ContentMap::new())?;
    let streak = controller
        .streak(learner, now(cli))
        .context("failed to compute streak")?;
    print_json(&streak)
}

fn cmd_status(cli: &Cli, learner: &str) -> Result<()> {
    let controller = open_controller(cli, ContentMap::new())?;
    let status = controller
        .status(learner, now(cli))
        .context("failed to load status")?;
    print_json(&status)
}
