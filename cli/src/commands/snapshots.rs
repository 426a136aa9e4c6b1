use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use parabak_core::Repository;
use parabak_core::snapshot::SnapshotInfo;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(long, help = "Show latest N snapshots")]
    latest: Option<usize>,
}

#[derive(Serialize)]
struct SnapshotRow {
    #[serde(flatten)]
    info: SnapshotInfo,
    entries: Option<u64>,
    failures: Option<usize>,
    hostname: Option<String>,
}

impl SnapshotsCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo_path = cli.repo_path(config)?;

        info!("Opening repository at: {}", repo_path.display());
        let repo = Repository::open(&repo_path).await?;

        let mut snapshots = repo.snapshots().list_snapshots().await?;
        let format = self.format.as_deref().unwrap_or("table");

        if snapshots.is_empty() {
            println!("No snapshots found");
            return Ok(());
        }

        if let Some(latest) = self.latest {
            let skip = snapshots.len().saturating_sub(latest);
            snapshots.drain(..skip);
        }

        let mut rows = Vec::with_capacity(snapshots.len());
        for info in snapshots {
            let seal = match repo.snapshots().read_seal(&info.path).await {
                Ok(seal) => seal,
                Err(e) => {
                    warn!("Cannot read seal of {}: {}", info.name, e);
                    None
                }
            };
            rows.push(SnapshotRow {
                entries: seal.as_ref().map(|s| s.entries),
                failures: seal.as_ref().map(|s| s.failures.len()),
                hostname: seal.map(|s| s.hostname),
                info,
            });
        }

        match format {
            "table" => {
                println!("{:<36} {:<20} {:<8} {:<8} {:<8} {}",
                    "Name", "Date (UTC)", "Sealed", "Files", "Failed", "Host");
                println!("{:-<100}", "");

                for row in rows {
                    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
                    println!("{:<36} {:<20} {:<8} {:<8} {:<8} {}",
                        row.info.name,
                        row.info.timestamp.as_datetime().format("%Y-%m-%d %H:%M:%S"),
                        if row.info.sealed { "yes" } else { "no" },
                        or_dash(row.entries.map(|n| n.to_string())),
                        or_dash(row.failures.map(|n| n.to_string())),
                        or_dash(row.hostname),
                    );
                }
            },
            "json" => {
                let json = serde_json::to_string_pretty(&rows)?;
                println!("{}", json);
            },
            _ => {
                return Err(anyhow!("Unsupported format: {}", format));
            }
        }

        Ok(())
    }
}
