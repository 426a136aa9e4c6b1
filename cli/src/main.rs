mod commands;
mod config;
mod progress;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, compare::CompareCommand, duplicates::DuplicatesCommand,
    restore::RestoreCommand, snapshots::SnapshotsCommand, verify::VerifyCommand,
};
use config::Config;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "parabak",
    version,
    about = "A content-addressed backup tool",
    long_about = "Parabak backs up the files named by a checklist into a deduplicating repository of plain files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Config file (defaults to the per-user config.toml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "PARABAK_REPO", help = "Repository path")]
    repo: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PARABAK_CHECKLIST",
        help = "Checklist file, one root path per line"
    )]
    checklist: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,
}

impl Cli {
    fn repo_path(&self, config: &Config) -> Result<PathBuf> {
        self.repo
            .clone()
            .or_else(|| config.repository.clone())
            .ok_or_else(|| {
                anyhow!("Repository path required (--repo, PARABAK_REPO or config file)")
            })
    }

    fn checklist_path(&self, config: &Config) -> Result<PathBuf> {
        self.checklist
            .clone()
            .or_else(|| config.checklist.clone())
            .ok_or_else(|| {
                anyhow!("Checklist path required (--checklist, PARABAK_CHECKLIST or config file)")
            })
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Back up the files named by the checklist")]
    Backup(BackupCommand),

    #[command(about = "Check checklist files against the latest snapshot")]
    Verify(VerifyCommand),

    #[command(about = "Restore files from a snapshot")]
    Restore(RestoreCommand),

    #[command(about = "Report files with identical content")]
    Duplicates(DuplicatesCommand),

    #[command(about = "Show what changed between two snapshots")]
    Compare(CompareCommand),

    #[command(about = "List snapshots")]
    Snapshots(SnapshotsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;

    let config = Config::load(cli.config.as_deref())?;
    debug!("Effective config: {:?}", config);
    info!("Starting Parabak");

    match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Verify(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Restore(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Duplicates(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Compare(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Snapshots(ref cmd) => cmd.run(&cli, &config).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parabak={}", level)));
    tracing::subscriber::set_global_default(build_subscriber(filter, std::io::stderr))?;
    Ok(())
}

/// Logs go to `writer` so that stdout stays reserved for command output.
fn build_subscriber<W>(filter: EnvFilter, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish()
}
