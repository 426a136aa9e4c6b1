use crate::duplicates::{DuplicateSummary, summarize};
use crate::hasher::hash_file;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::snapshot::SealCheck;
use crate::targets::TargetSet;
use crate::{ContentHash, Error, JobSize, Repository, Result, TargetFile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// How deep a verification run looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Checks that every target is recorded and its blob exists.
    #[default]
    Fast,
    /// Also re-hashes every found target and every stored blob.
    #[serde(alias = "slow")]
    Thorough,
}

impl FromStr for VerifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(VerifyMode::Fast),
            "slow" | "thorough" => Ok(VerifyMode::Thorough),
            other => Err(Error::Other(format!("Unknown verify mode: {}", other))),
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Fast => f.write_str("fast"),
            VerifyMode::Thorough => f.write_str("thorough"),
        }
    }
}

/// One inconsistency found by a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The target exists on disk but the snapshot does not record it.
    NotInSnapshot { path: PathBuf },
    /// The snapshot records the target but its blob is gone.
    MissingBlob { path: PathBuf, hash: ContentHash },
    /// The target or its blob no longer hashes to the recorded value.
    ContentMismatch {
        path: PathBuf,
        recorded: ContentHash,
        current: Option<ContentHash>,
        stored: Option<ContentHash>,
    },
    Unreadable { path: PathBuf, error: String },
    /// A blob whose bytes do not match its name.
    CorruptBlob {
        hash: ContentHash,
        actual: ContentHash,
    },
    SealMismatch {
        snapshot: PathBuf,
        expected: ContentHash,
        actual: ContentHash,
    },
    /// A temp artifact left behind by an interrupted backup.
    StaleTempFile { path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub mode: VerifyMode,
    pub snapshot: PathBuf,
    /// Targets examined in the structural phase.
    pub checked: u64,
    pub found: u64,
    pub not_found: u64,
    /// Targets re-hashed in the content phase.
    pub content_checked: u64,
    pub blobs_audited: u64,
    pub duplicates: DuplicateSummary,
    pub findings: Vec<Finding>,
}

impl VerifyReport {
    pub fn found_fraction(&self) -> f64 {
        let total = self.found + self.not_found;
        if total == 0 {
            1.0
        } else {
            self.found as f64 / total as f64
        }
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn mismatches(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| {
                matches!(
                    f,
                    Finding::ContentMismatch { .. }
                        | Finding::CorruptBlob { .. }
                        | Finding::SealMismatch { .. }
                )
            })
            .count()
    }
}

/// Cross-checks `targets` against the latest sealed snapshot of `repo`.
///
/// Nothing in the repository is modified. Inconsistencies become findings
/// in the report; only a missing snapshot or an unreadable repository is an
/// error.
pub async fn verify(
    repo: &Repository,
    targets: &TargetSet,
    mode: VerifyMode,
    reporter: &mut dyn ProgressReporter,
) -> Result<VerifyReport> {
    let snapshot = repo.snapshots().load_latest().await?;
    let known = repo.store().known_hashes().await?;
    let duplicates = summarize(&snapshot.entries);

    let mut files: Vec<TargetFile> = targets.files.clone();
    files.sort();
    files.dedup();

    let mut findings: Vec<Finding> = targets
        .unreadable
        .iter()
        .map(|f| Finding::Unreadable {
            path: f.path.clone(),
            error: f.error.clone(),
        })
        .collect();

    info!(
        "Verification step 1: checking that {} checklist files are recorded in {} and stored",
        files.len(),
        snapshot.name()
    );

    let mut found_targets = Vec::new();
    let mut not_found = 0u64;
    for target in &files {
        match snapshot.entries.get(&target.path) {
            None => {
                warn!("File not found in latest snapshot: {}", target.path.display());
                findings.push(Finding::NotInSnapshot {
                    path: target.path.clone(),
                });
                not_found += 1;
            }
            Some(hash) if !known.contains(hash) => {
                warn!(
                    "File recorded in snapshot but its blob is missing: {}",
                    target.path.display()
                );
                findings.push(Finding::MissingBlob {
                    path: target.path.clone(),
                    hash: *hash,
                });
                not_found += 1;
            }
            Some(hash) => found_targets.push((target, *hash)),
        }
    }

    let mut report = VerifyReport {
        mode,
        snapshot: snapshot.path.clone(),
        checked: files.len() as u64,
        found: found_targets.len() as u64,
        not_found,
        content_checked: 0,
        blobs_audited: 0,
        duplicates,
        findings: Vec::new(),
    };
    info!(
        "{} of {} checklist files found ({:.2}%)",
        report.found,
        report.checked,
        report.found_fraction() * 100.0
    );

    if mode == VerifyMode::Thorough {
        info!("Verification step 2: re-hashing {} files and their blobs", found_targets.len());

        let job = JobSize {
            files: found_targets.len() as u64,
            bytes: found_targets.iter().map(|(t, _)| t.size_bytes).sum(),
        };
        let mut progress = ProgressTracker::new(job, reporter);
        let mut audited: HashMap<ContentHash, Option<ContentHash>> = HashMap::new();

        for (target, recorded) in &found_targets {
            let stored = match audited.get(recorded) {
                Some(stored) => *stored,
                None => {
                    let stored = match repo.store().audit_blob(recorded).await {
                        Ok(actual) => Some(actual),
                        Err(e) => {
                            warn!("Cannot read blob {}: {}", recorded, e);
                            None
                        }
                    };
                    audited.insert(*recorded, stored);
                    stored
                }
            };

            match hash_file(&target.path).await {
                Ok(current) => {
                    report.content_checked += 1;
                    if current != *recorded || stored != Some(*recorded) {
                        warn!("Content mismatch for {}", target.path.display());
                        findings.push(Finding::ContentMismatch {
                            path: target.path.clone(),
                            recorded: *recorded,
                            current: Some(current),
                            stored,
                        });
                    }
                }
                Err(e) => {
                    warn!("Cannot re-read {}: {}", target.path.display(), e);
                    findings.push(Finding::Unreadable {
                        path: target.path.clone(),
                        error: e.to_string(),
                    });
                    if stored != Some(*recorded) {
                        findings.push(Finding::ContentMismatch {
                            path: target.path.clone(),
                            recorded: *recorded,
                            current: None,
                            stored,
                        });
                    }
                }
            }
            progress.tick(target.size_bytes);
        }
        progress.finish();

        // Blobs referenced by the targets were audited above; the rest of
        // the store is audited here.
        let mut hashes: Vec<&ContentHash> = known.iter().collect();
        hashes.sort();
        for hash in hashes {
            let actual = match audited.get(hash) {
                Some(actual) => *actual,
                None => match repo.store().audit_blob(hash).await {
                    Ok(actual) => Some(actual),
                    Err(e) => {
                        findings.push(Finding::Unreadable {
                            path: repo.store().blob_path(hash),
                            error: e.to_string(),
                        });
                        continue;
                    }
                },
            };
            if let Some(actual) = actual.filter(|a| a != hash) {
                warn!("Blob {} is corrupt (hashes to {})", hash, actual);
                findings.push(Finding::CorruptBlob {
                    hash: *hash,
                    actual,
                });
            }
        }
        report.blobs_audited = known.len() as u64;

        match repo.snapshots().verify_seal(&snapshot.path).await? {
            SealCheck::Mismatch { expected, actual } => {
                warn!("Snapshot {} does not match its seal", snapshot.name());
                findings.push(Finding::SealMismatch {
                    snapshot: snapshot.path.clone(),
                    expected,
                    actual,
                });
            }
            SealCheck::Intact => debug!("Seal of {} is intact", snapshot.name()),
            SealCheck::Unsealed => {}
        }
    }

    for path in repo.store().stale_temp_files().await? {
        warn!("Leftover temporary file in repository: {}", path.display());
        findings.push(Finding::StaleTempFile { path });
    }

    report.findings = findings;
    if report.is_clean() {
        info!("SUCCESS! All checklist files were found in the repository");
    } else {
        info!("Verification finished with {} findings", report.findings.len());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupOptions, create_backup_at};
    use crate::progress::NoProgress;
    use crate::snapshot::SnapshotTimestamp;
    use crate::targets::resolve_targets;
    use chrono::{TimeZone, Utc};

    fn ts(sec: u32) -> SnapshotTimestamp {
        SnapshotTimestamp::from_datetime(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, sec).unwrap())
    }

    async fn backed_up(
        files: &[(&str, &str)],
    ) -> (tempfile::TempDir, tempfile::TempDir, Repository) {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            std::fs::write(src.path().join(name), data).unwrap();
        }
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();
        create_backup_at(&repo, &targets, ts(0), &BackupOptions::default(), &mut NoProgress)
            .await
            .unwrap();
        (src, repo_dir, repo)
    }

    async fn run(repo: &Repository, src: &std::path::Path, mode: VerifyMode) -> VerifyReport {
        let targets = resolve_targets(&[src.to_path_buf()]).unwrap();
        verify(repo, &targets, mode, &mut NoProgress).await.unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fast".parse::<VerifyMode>().unwrap(), VerifyMode::Fast);
        assert_eq!("slow".parse::<VerifyMode>().unwrap(), VerifyMode::Thorough);
        assert_eq!("Thorough".parse::<VerifyMode>().unwrap(), VerifyMode::Thorough);
        assert!("quick".parse::<VerifyMode>().is_err());
    }

    #[tokio::test]
    async fn test_clean_repository_verifies_in_both_modes() {
        let (src, _repo_dir, repo) = backed_up(&[("x.txt", "hello"), ("y.txt", "hello")]).await;

        let fast = run(&repo, src.path(), VerifyMode::Fast).await;
        assert_eq!(fast.found, 2);
        assert_eq!(fast.not_found, 0);
        assert!(fast.is_clean());
        assert_eq!(fast.duplicates.duplicate_count, 1);

        let thorough = run(&repo, src.path(), VerifyMode::Thorough).await;
        assert!(thorough.is_clean());
        assert_eq!(thorough.content_checked, 2);
        assert_eq!(thorough.blobs_audited, 1);
        assert_eq!(thorough.mismatches(), 0);
    }

    #[tokio::test]
    async fn test_structural_findings() {
        let (src, _repo_dir, repo) = backed_up(&[("a.txt", "aaa"), ("b.txt", "bbb")]).await;
        std::fs::write(src.path().join("new.txt"), "new").unwrap();
        std::fs::remove_file(repo.store().blob_path(&ContentHash::from_data(b"bbb"))).unwrap();

        let report = run(&repo, src.path(), VerifyMode::Fast).await;

        assert_eq!(report.checked, 3);
        assert_eq!(report.found, 1);
        assert_eq!(report.not_found, 2);
        assert!(report.findings.iter().any(|f| matches!(
            f,
            Finding::NotInSnapshot { path } if path.ends_with("new.txt")
        )));
        assert!(report.findings.iter().any(|f| matches!(
            f,
            Finding::MissingBlob { path, .. } if path.ends_with("b.txt")
        )));
    }

    #[tokio::test]
    async fn test_thorough_detects_modified_target_and_corrupt_blob() {
        let (src, _repo_dir, repo) = backed_up(&[("a.txt", "aaa"), ("b.txt", "bbb")]).await;
        std::fs::write(src.path().join("a.txt"), "edited").unwrap();
        let b_hash = ContentHash::from_data(b"bbb");
        std::fs::write(repo.store().blob_path(&b_hash), "rot").unwrap();

        let fast = run(&repo, src.path(), VerifyMode::Fast).await;
        assert!(fast.is_clean());

        let report = run(&repo, src.path(), VerifyMode::Thorough).await;
        assert_eq!(report.mismatches(), 3);
        assert!(report.findings.iter().any(|f| matches!(
            f,
            Finding::ContentMismatch { path, current: Some(current), .. }
                if path.ends_with("a.txt") && *current == ContentHash::from_data(b"edited")
        )));
        assert!(report.findings.iter().any(|f| matches!(
            f,
            Finding::ContentMismatch { path, current: Some(current), stored: Some(stored), .. }
                if path.ends_with("b.txt") && *current == b_hash && *stored != b_hash
        )));
        assert!(report.findings.iter().any(|f| matches!(
            f,
            Finding::CorruptBlob { hash, .. } if *hash == b_hash
        )));
    }

    #[tokio::test]
    async fn test_stale_temp_files_are_reported() {
        let (src, _repo_dir, repo) = backed_up(&[("a.txt", "aaa")]).await;
        let hash = ContentHash::from_data(b"zzz");
        let temp = repo.store().temp_path(&hash, &ts(9).session_token());
        std::fs::write(&temp, b"partial").unwrap();

        let report = run(&repo, src.path(), VerifyMode::Fast).await;
        assert_eq!(report.found, 1);
        assert_eq!(report.findings, vec![Finding::StaleTempFile { path: temp }]);
    }

    #[tokio::test]
    async fn test_verify_without_snapshot_is_fatal() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(repo_dir.path()).await.unwrap();
        let err = verify(&repo, &TargetSet::default(), VerifyMode::Fast, &mut NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSnapshotsFound { .. }));
    }
}
