//! Soulbond CLI - replay scripts and administer the ban ledger
//!
//! State lives in a directory of JSON documents. Every command restores it
//! on start and flushes pending writes before exiting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use soulbond_engine::{persistence_channel, EngineConfig, JsonFileStorage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod script;

use script::Session;

/// Soulbond CLI
#[derive(Parser)]
#[command(name = "soulbond")]
#[command(about = "Soulbond - escalating death bans, soul links and rituals", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SOULBOND_CONFIG", default_value = "soulbond.toml")]
    config: PathBuf,

    /// Directory holding bans.json, tiers.json and bonds.json
    #[arg(short, long, env = "SOULBOND_DATA_DIR", default_value = "soulbond-data")]
    data_dir: PathBuf,

    /// Log level
    #[arg(long, env = "SOULBOND_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "SOULBOND_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines script, one report per line on stdout
    Replay {
        /// Script file (stdin when omitted)
        script: Option<PathBuf>,
    },
    /// List active bans
    Bans,
    /// Lift the ban of a player by display name
    Unban { name: String },
    /// Lift every active ban
    ClearBans,
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());
    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .without_time(),
            )
            .init();
    }

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if let Command::CheckConfig = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let (session, writer) = open(config, &cli.data_dir).await?;
    let result = run(&cli.command, session).await;
    // The writer drains once the last handle is gone.
    writer.await.context("persistence writer panicked")?;
    result
}

async fn open(config: EngineConfig, data_dir: &Path) -> Result<(Session, JoinHandle<()>)> {
    let storage = Arc::new(JsonFileStorage::new(data_dir));
    let session = Session::new(config);

    let summary = session
        .engine()
        .restore_from(storage.as_ref())
        .await
        .with_context(|| format!("restoring state from {}", data_dir.display()))?;
    info!(
        data_dir = %data_dir.display(),
        bans = summary.bans,
        tiers = summary.tiers,
        bonds = summary.bonds,
        "Opened state"
    );

    let (handle, writer) = persistence_channel(storage);
    session.engine().attach_persistence(handle);
    Ok((session, tokio::spawn(writer.run())))
}

async fn run(command: &Command, mut session: Session) -> Result<()> {
    match command {
        Command::Replay { script } => {
            let reader: Box<dyn AsyncBufRead + Unpin> = match script {
                Some(path) => Box::new(BufReader::new(
                    tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };
            replay(&mut session, reader).await
        }
        Command::Bans => {
            for ban in session.engine().active_bans() {
                println!("{}", serde_json::to_string(&ban)?);
            }
            Ok(())
        }
        Command::Unban { name } => match session.engine().unban_by_name(name) {
            Some(player) => {
                info!(player_id = %player, name = %name, "Ban lifted");
                Ok(())
            }
            None => bail!("no active ban for '{}'", name),
        },
        Command::ClearBans => {
            let cleared = session.engine().clear_bans();
            info!(cleared, "Bans cleared");
            Ok(())
        }
        Command::CheckConfig => Ok(()),
    }
}

async fn replay(session: &mut Session, reader: Box<dyn AsyncBufRead + Unpin>) -> Result<()> {
    let mut lines = reader.lines();
    let mut number = 0;
    while let Some(raw) = lines.next_line().await? {
        number += 1;
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        match session.apply_raw(number, raw) {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => warn!(line = number, error = %e, "Skipping script line"),
        }
    }
    Ok(())
}
