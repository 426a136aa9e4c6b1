use crate::config::Config;
use crate::progress::BarProgress;
use anyhow::{Result, anyhow};
use clap::Args;
use parabak_core::Repository;
use parabak_core::targets::resolve_checklist;
use parabak_core::verify::{Finding, VerifyMode, verify};
use tracing::info;

#[derive(Args)]
pub struct VerifyCommand {
    #[arg(long, help = "Verification depth (fast, thorough)")]
    mode: Option<VerifyMode>,

    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

impl VerifyCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo_path = cli.repo_path(config)?;
        let checklist = cli.checklist_path(config)?;
        let mode = self.mode.or(config.verify_mode).unwrap_or_default();

        info!("Opening repository at: {}", repo_path.display());
        let repo = Repository::open(&repo_path).await?;
        let targets = resolve_checklist(&checklist).await?;

        let mut bar = BarProgress::new("Verifying", cli.quiet || mode == VerifyMode::Fast);
        let report = verify(&repo, &targets, mode, &mut bar).await?;
        bar.finish("Files verified");

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("🔍 Verified against {} ({} mode)", report.snapshot.display(), report.mode);
            println!(
                "📁 Found: {}/{} ({:.2}%)",
                report.found,
                report.found + report.not_found,
                report.found_fraction() * 100.0
            );
            if mode == VerifyMode::Thorough {
                println!(
                    "🔁 Re-hashed: {} files, {} blobs",
                    report.content_checked, report.blobs_audited
                );
            }
            println!(
                "📊 Snapshot entries: {} total, {} unique, {} duplicates",
                report.duplicates.total_entries,
                report.duplicates.unique_hashes,
                report.duplicates.duplicate_count
            );
            for finding in &report.findings {
                println!("   {}", describe(finding));
            }
        }

        if report.is_clean() {
            println!("✅ SUCCESS! All checklist files were found in the repository");
            Ok(())
        } else {
            Err(anyhow!("Verification found {} problem(s)", report.findings.len()))
        }
    }
}

fn describe(finding: &Finding) -> String {
    match finding {
        Finding::NotInSnapshot { path } => format!("not in snapshot: {}", path.display()),
        Finding::MissingBlob { path, hash } => {
            format!("blob {} missing for {}", hash.short_string(), path.display())
        }
        Finding::ContentMismatch {
            path,
            recorded,
            current,
            stored,
        } => format!(
            "content mismatch: {} (recorded {}, current {}, stored {})",
            path.display(),
            recorded.short_string(),
            current.map(|h| h.short_string()).unwrap_or_else(|| "unreadable".to_string()),
            stored.map(|h| h.short_string()).unwrap_or_else(|| "unreadable".to_string())
        ),
        Finding::Unreadable { path, error } => format!("unreadable: {}: {}", path.display(), error),
        Finding::CorruptBlob { hash, actual } => {
            format!("corrupt blob {} (hashes to {})", hash, actual)
        }
        Finding::SealMismatch { snapshot, .. } => {
            format!("snapshot modified after sealing: {}", snapshot.display())
        }
        Finding::StaleTempFile { path } => format!("leftover temp file: {}", path.display()),
    }
}
