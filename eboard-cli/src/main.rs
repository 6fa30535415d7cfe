use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cozy_chess::Board;
use eboard_sync::board_link::{BoardLink, LinkConfig};
use eboard_sync::clock::{ClockConfig, ClockSync};
use eboard_sync::resolver::{resolve, Resolution};
use eboard_sync::session::{SessionConfig, SessionCoordinator};
use eboard_sync::time_control::parse_duration;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod event_log;
mod file_board;
mod terminal;

use event_log::EventLog;
use file_board::{parse_occupancy, FileBoard};
use terminal::TerminalClock;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EboardCliConfig {
    link: LinkConfig,
    session: SessionConfig,
    clock: ClockConfig
}

fn clap_parse_duration(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {:?}", s))
}

#[derive(Debug, Parser)]
struct EboardCliArgs {
    #[clap(long, default_value = "eboard-cli-config.json")]
    config: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(long)]
    debug: bool,
    #[clap(subcommand)]
    subcommand: Commands
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Explain one board read against a position.
    Resolve {
        #[clap(long)]
        fen: String,
        /// 0/1 grid, rank 8 first, or a FEN piece placement.
        #[clap(long)]
        occupancy: String
    },
    /// Play recorded server events against a board file.
    Replay {
        #[clap(long)]
        events: PathBuf,
        #[clap(long)]
        board: PathBuf,
        #[clap(long, default_value = "1s", value_parser = clap_parse_duration)]
        pace: Duration
    }
}

fn load_config(path: &Path) -> Result<EboardCliConfig> {
    if !path.exists() {
        return Ok(EboardCliConfig::default());
    }
    let config = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&config).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = EboardCliArgs::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .with_writer(std::io::stderr)
        .init();
    let config = load_config(&args.config)?;

    match args.subcommand {
        Commands::Resolve { fen, occupancy } => {
            let board: Board = fen.parse().map_err(|_| anyhow!("invalid FEN {:?}", fen))?;
            let observed = parse_occupancy(&occupancy)
                .ok_or_else(|| anyhow!("occupancy is neither a 0/1 grid nor a piece placement"))?;
            match resolve(&board, &observed) {
                Resolution::NoChange => println!("no change"),
                Resolution::Move(found) => println!("{} ({:?})", found.mv, found.flag),
                Resolution::Ambiguous(ambiguity) => println!("{}", ambiguity),
                Resolution::Illegal(mismatch) => println!("{}", mismatch)
            }
        }
        Commands::Replay { events, board, pace } => {
            let link = BoardLink::new(FileBoard::new(board), config.link)
                .context("connecting to board file")?;
            let remote = Arc::new(EventLog::new(events, pace));
            let finished = remote.finished();
            let mut coordinator = SessionCoordinator::new(
                Arc::new(link),
                Arc::new(ClockSync::new(config.clock)),
                remote,
                Arc::new(TerminalClock),
                config.session
            );

            let (stop, shutdown) = watch::channel(false);
            tokio::spawn(async move {
                tokio::select! {
                    _ = finished.notified() => info!("event log replayed"),
                    _ = tokio::signal::ctrl_c() => info!("interrupted")
                }
                let _ = stop.send(true);
            });
            coordinator.run(shutdown).await?;
        }
    }
    Ok(())
}
