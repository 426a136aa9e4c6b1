use crate::hasher::hash_file;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::snapshot::{SealRecord, SnapshotInfo, SnapshotTimestamp, recordable_path};
use crate::store::KnownHashes;
use crate::targets::TargetSet;
use crate::{ContentHash, FailureRecord, JobSize, Repository, Result, SessionToken, TargetFile};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning knobs for a backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub progress_interval: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            progress_interval: crate::progress::DEFAULT_INTERVAL,
        }
    }
}

/// Outcome of a completed, sealed backup run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub snapshot: SnapshotInfo,
    pub seal: SealRecord,
    pub job: JobSize,
    /// Targets recorded in the snapshot.
    pub files_recorded: u64,
    pub bytes_recorded: u64,
    pub new_blobs: u64,
    pub new_bytes: u64,
    pub failures: Vec<FailureRecord>,
}

impl BackupReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What happened to one target.
enum FileOutcome {
    Deduplicated(ContentHash),
    Stored(ContentHash, u64),
}

/// Backs up `targets` into `repo`, stamping the snapshot with the current time.
pub async fn create_backup(
    repo: &Repository,
    targets: &TargetSet,
    options: &BackupOptions,
    reporter: &mut dyn ProgressReporter,
) -> Result<BackupReport> {
    create_backup_at(repo, targets, SnapshotTimestamp::now(), options, reporter).await
}

/// Backs up `targets` into `repo` as the snapshot for `timestamp`.
///
/// Files are processed in path order. A file that cannot be hashed, copied
/// or recorded is listed in the report and skipped; the run continues. Only
/// fatal conditions abort: a snapshot for the same second already exists, a
/// temp blob path collides, or the snapshot itself cannot be written.
pub async fn create_backup_at(
    repo: &Repository,
    targets: &TargetSet,
    timestamp: SnapshotTimestamp,
    options: &BackupOptions,
    reporter: &mut dyn ProgressReporter,
) -> Result<BackupReport> {
    let session = timestamp.session_token();

    let mut files: Vec<TargetFile> = targets.files.clone();
    files.sort();
    files.dedup();
    let job = JobSize::of(&files);
    info!("Number of target files to back up: {}, totaling {} bytes", job.files, job.bytes);

    repo.prepare().await?;
    let mut writer = repo.snapshots().begin_snapshot(timestamp).await?;
    let mut known = repo.store().known_hashes().await?;
    info!("Repository already holds {} blobs", known.len());

    let mut failures = targets.unreadable.clone();
    let mut files_recorded = 0u64;
    let mut bytes_recorded = 0u64;
    let mut new_blobs = 0u64;
    let mut new_bytes = 0u64;

    let mut progress = ProgressTracker::with_interval(job, reporter, options.progress_interval);

    for target in &files {
        match back_up_file(repo, &mut known, target, &session).await {
            Ok(outcome) => {
                let hash = match outcome {
                    FileOutcome::Deduplicated(hash) => hash,
                    FileOutcome::Stored(hash, bytes) => {
                        new_blobs += 1;
                        new_bytes += bytes;
                        hash
                    }
                };
                // Failing to extend the snapshot means the record itself is
                // broken, so it is never isolated to one file.
                writer.append(&target.path, &hash).await?;
                files_recorded += 1;
                bytes_recorded += target.size_bytes;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Failed to back up {}: {}", target.path.display(), e);
                failures.push(FailureRecord::new(&target.path, &e));
            }
        }
        progress.tick(target.size_bytes);
    }
    progress.finish();

    let snapshot = writer.info().clone();
    let seal = writer.seal(failures.clone()).await?;
    let snapshot = SnapshotInfo {
        sealed: true,
        ..snapshot
    };

    info!(
        "Backup {} finished: {} files recorded, {} new blobs ({} bytes), {} failures",
        snapshot.name,
        files_recorded,
        new_blobs,
        new_bytes,
        failures.len()
    );

    Ok(BackupReport {
        snapshot,
        seal,
        job,
        files_recorded,
        bytes_recorded,
        new_blobs,
        new_bytes,
        failures,
    })
}

async fn back_up_file(
    repo: &Repository,
    known: &mut KnownHashes,
    target: &TargetFile,
    session: &SessionToken,
) -> Result<FileOutcome> {
    // Refuse unrecordable paths before anything is copied.
    recordable_path(&target.path)?;

    let hash = hash_file(&target.path).await?;
    if known.contains(&hash) {
        debug!("{} already stored as {}", target.path.display(), hash.short_string());
        return Ok(FileOutcome::Deduplicated(hash));
    }

    let bytes = repo
        .store()
        .commit(known, &target.path, &hash, session)
        .await?;
    Ok(FileOutcome::Stored(hash, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::progress::NoProgress;
    use crate::targets::resolve_targets;
    use chrono::{TimeZone, Utc};
    use std::path::{Path, PathBuf};

    fn ts(sec: u32) -> SnapshotTimestamp {
        SnapshotTimestamp::from_datetime(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, sec).unwrap())
    }

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn run(repo: &Repository, targets: &TargetSet, sec: u32) -> Result<BackupReport> {
        create_backup_at(repo, targets, ts(sec), &BackupOptions::default(), &mut NoProgress).await
    }

    #[tokio::test]
    async fn test_identical_files_share_one_blob() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "x.txt", b"hello");
        write(src.path(), "y.txt", b"hello");
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();

        let report = run(&repo, &targets, 0).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.files_recorded, 2);
        assert_eq!(report.new_blobs, 1);
        assert_eq!(report.new_bytes, 5);
        assert!(report.snapshot.sealed);
        assert_eq!(repo.store().known_hashes().await.unwrap().len(), 1);

        let text = std::fs::read_to_string(&report.snapshot.path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let hash = ContentHash::from_data(b"hello");
        assert!(lines[0].ends_with(&format!(" /// {hash}")));
        assert!(lines[1].ends_with(&format!(" /// {hash}")));
    }

    #[tokio::test]
    async fn test_rerun_over_unchanged_tree_stores_nothing_new() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "a/one.bin", b"one");
        write(src.path(), "b/two.bin", b"two");
        write(src.path(), "c.bin", b"three");
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();

        let first = run(&repo, &targets, 0).await.unwrap();
        let second = run(&repo, &targets, 1).await.unwrap();

        assert_eq!(first.new_blobs, 3);
        assert_eq!(second.new_blobs, 0);
        assert_eq!(
            std::fs::read(&first.snapshot.path).unwrap(),
            std::fs::read(&second.snapshot.path).unwrap()
        );
        assert_eq!(repo.snapshots().load_latest().await.unwrap().timestamp, Some(ts(1)));
    }

    #[tokio::test]
    async fn test_vanished_file_is_isolated() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "keep.txt", b"keep");
        let doomed = write(src.path(), "gone.txt", b"gone");
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();
        std::fs::remove_file(&doomed).unwrap();

        let report = run(&repo, &targets, 0).await.unwrap();

        assert_eq!(report.files_recorded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, doomed);
        assert_eq!(report.seal.failures, report.failures);
        assert_eq!(report.seal.entries, 1);

        let loaded = repo.snapshots().load_latest().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.entries.contains_key(&doomed));
    }

    #[tokio::test]
    async fn test_temp_collision_aborts_the_session() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"aaa");
        let repo = Repository::init(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();

        let hash = ContentHash::from_data(b"aaa");
        let temp = repo.store().temp_path(&hash, &ts(0).session_token());
        std::fs::write(&temp, b"").unwrap();

        let err = run(&repo, &targets, 0).await.unwrap_err();
        assert!(matches!(err, Error::ClockOrCollision { .. }));

        // The aborted run leaves an unsealed snapshot that is never latest.
        let listed = repo.snapshots().list_snapshots().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].sealed);
    }

    #[tokio::test]
    async fn test_same_second_backup_is_refused() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"a");
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();

        run(&repo, &targets, 5).await.unwrap();
        let err = run(&repo, &targets, 5).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateSnapshot { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_entries_from_resolution_are_reported() {
        let src = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"a");
        let repo = Repository::open(repo_dir.path()).await.unwrap();
        let mut targets = resolve_targets(&[src.path().to_path_buf()]).unwrap();
        targets
            .unreadable
            .push(FailureRecord::new("/locked/dir", "permission denied"));

        let report = run(&repo, &targets, 0).await.unwrap();
        assert_eq!(report.files_recorded, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_complete());
    }
}
