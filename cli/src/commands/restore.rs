use crate::config::Config;
use crate::progress::BarProgress;
use anyhow::Result;
use clap::Args;
use parabak_core::Repository;
use parabak_core::restore::{RestoreDestination, RestoreOptions, SnapshotSource, restore};
use std::path::PathBuf;
use tracing::info;

const ORIGIN: &str = "origin";

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(long, help = "Snapshot file to restore (defaults to the latest sealed snapshot)")]
    snapshot: Option<PathBuf>,

    #[arg(long, help = "Target directory, or \"origin\" for the recorded locations")]
    to: String,

    #[arg(long, help = "Replace existing files whose content differs")]
    overwrite: bool,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo_path = cli.repo_path(config)?;

        info!("Opening repository at: {}", repo_path.display());
        let repo = Repository::open(&repo_path).await?;

        let source = match &self.snapshot {
            Some(path) => SnapshotSource::Path(path.clone()),
            None => SnapshotSource::Latest,
        };
        let destination = if self.to == ORIGIN {
            RestoreDestination::Origin
        } else {
            RestoreDestination::Directory(PathBuf::from(&self.to))
        };
        let options = RestoreOptions {
            overwrite: self.overwrite,
            progress_interval: config.progress_interval(),
        };

        let mut bar = BarProgress::new("Restoring", cli.quiet);
        let report = restore(&repo, &source, &destination, &options, &mut bar).await?;
        bar.finish("Restore completed");

        println!("✅ Restore completed!");
        println!("📸 Snapshot: {}", report.snapshot.display());
        println!("📁 Restored: {} ({} bytes)", report.restored, report.bytes);
        if report.already_present > 0 {
            println!("✔️  Already present: {}", report.already_present);
        }
        if !report.is_complete() {
            println!("❌ Failed: {}", report.failures.len());
            for failure in &report.failures {
                println!("   {}: {}", failure.path.display(), failure.error);
            }
        }
        match &destination {
            RestoreDestination::Origin => println!("📂 Location: original paths"),
            RestoreDestination::Directory(root) => println!("📂 Location: {}", root.display()),
        }

        Ok(())
    }
}
