use crate::config::Config;
use anyhow::Result;
use clap::Args;
use parabak_core::Repository;
use parabak_core::duplicates::find_duplicates;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct DuplicatesCommand {
    #[arg(long, help = "Only report groups of at least this many bytes")]
    threshold: Option<u64>,

    #[arg(long, help = "Snapshot file to analyze (defaults to the latest sealed snapshot)")]
    snapshot: Option<PathBuf>,

    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

impl DuplicatesCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let snapshot = match &self.snapshot {
            Some(path) => parabak_core::snapshot::load_snapshot_file(path).await?,
            None => {
                let repo_path = cli.repo_path(config)?;
                info!("Opening repository at: {}", repo_path.display());
                Repository::open(&repo_path).await?.snapshots().load_latest().await?
            }
        };
        let threshold = self.threshold.unwrap_or_else(|| config.duplicate_threshold());

        let report = find_duplicates(&snapshot.entries, threshold);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        for group in &report.groups {
            println!(
                "{} ({:.2} MB, {} copies)",
                group.hash.short_string(),
                group.size as f64 / 1024.0 / 1024.0,
                group.paths.len()
            );
            for path in &group.paths {
                println!("   {}", path.display());
            }
        }

        println!("📸 Snapshot: {}", snapshot.name());
        println!(
            "📊 Entries: {} total, {} unique, {} duplicates",
            report.summary.total_entries,
            report.summary.unique_hashes,
            report.summary.duplicate_count
        );
        println!("🔁 Groups of at least {} bytes: {}", threshold, report.groups.len());
        if let Some(largest) = report.largest() {
            println!(
                "💾 Largest: {:.2} MB x {} ({:.2} MB redundant)",
                largest.size as f64 / 1024.0 / 1024.0,
                largest.paths.len(),
                largest.redundant_bytes() as f64 / 1024.0 / 1024.0
            );
        }

        Ok(())
    }
}
