use crate::config::Config;
use crate::progress::BarProgress;
use anyhow::Result;
use clap::Args;
use parabak_core::Repository;
use parabak_core::backup::{BackupOptions, create_backup};
use parabak_core::targets::resolve_checklist;
use tracing::info;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, help = "Create the repository directory if it does not exist")]
    init: bool,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo_path = cli.repo_path(config)?;
        let checklist = cli.checklist_path(config)?;

        info!("Opening repository at: {}", repo_path.display());
        let repo = if self.init {
            Repository::init(&repo_path).await?
        } else {
            Repository::open(&repo_path).await?
        };

        info!("Reading checklist: {}", checklist.display());
        let targets = resolve_checklist(&checklist).await?;
        println!("📁 Backing up {} files...", targets.len());

        let options = BackupOptions {
            progress_interval: config.progress_interval(),
        };
        let mut bar = BarProgress::new("Backing up", cli.quiet);
        let report = create_backup(&repo, &targets, &options, &mut bar).await?;
        bar.finish("Files processed");

        println!("✅ Backup completed!");
        println!("📸 Snapshot: {}", report.snapshot.name);
        println!(
            "📁 Recorded: {} files ({:.2} MB)",
            report.files_recorded,
            report.bytes_recorded as f64 / 1024.0 / 1024.0
        );
        println!(
            "💾 New blobs: {} ({:.2} MB)",
            report.new_blobs,
            report.new_bytes as f64 / 1024.0 / 1024.0
        );

        if !report.is_complete() {
            println!("❌ Failed: {}", report.failures.len());
            for failure in &report.failures {
                println!("   {}: {}", failure.path.display(), failure.error);
            }
        }

        Ok(())
    }
}
