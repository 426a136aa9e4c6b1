use crate::config::Config;
use anyhow::Result;
use clap::Args;
use parabak_core::compare::{Change, compare_snapshot_files};
use std::path::PathBuf;

#[derive(Args)]
pub struct CompareCommand {
    #[arg(help = "Older snapshot file")]
    older: PathBuf,

    #[arg(help = "Newer snapshot file")]
    newer: PathBuf,

    #[arg(long, help = "Also list unchanged paths")]
    all: bool,

    #[arg(long, help = "Print the diff as JSON")]
    json: bool,
}

impl CompareCommand {
    pub async fn run(&self, _cli: &crate::Cli, _config: &Config) -> Result<()> {
        let diff = compare_snapshot_files(&self.older, &self.newer).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&diff)?);
            return Ok(());
        }

        for entry in &diff.entries {
            let marker = match entry.change {
                Change::Added { .. } => "+",
                Change::Removed { .. } => "-",
                Change::Modified { .. } => "M",
                Change::Unchanged { .. } if self.all => "=",
                Change::Unchanged { .. } => continue,
            };
            println!("{} {}", marker, entry.path.display());
        }

        let counts = diff.counts();
        println!(
            "📊 {} added, {} removed, {} modified, {} unchanged",
            counts.added, counts.removed, counts.modified, counts.unchanged
        );
        Ok(())
    }
}
