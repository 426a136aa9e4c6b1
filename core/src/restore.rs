use crate::hasher::{copy_hashed, hash_file};
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::snapshot::LoadedSnapshot;
use crate::store::{discard_temp, preserve_metadata};
use crate::{ContentHash, Error, FailureRecord, JobSize, Repository, Result};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

pub const RESTORE_TEMP_SUFFIX: &str = ".parabak-restore.tmp";

/// Which snapshot to restore from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The newest sealed snapshot of the repository.
    Latest,
    Path(PathBuf),
}

/// Where restored files are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreDestination {
    /// Back to the absolute paths recorded in the snapshot.
    Origin,
    /// Beneath this directory, using each recorded path made relative.
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Replace destination files whose content differs.
    pub overwrite: bool,
    pub progress_interval: Duration,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            progress_interval: crate::progress::DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub snapshot: PathBuf,
    pub restored: u64,
    /// Destinations that already held the recorded content.
    pub already_present: u64,
    pub bytes: u64,
    pub failures: Vec<FailureRecord>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum EntryOutcome {
    Restored(u64),
    AlreadyPresent,
}

/// Turns a recorded path into a relative path that stays beneath a
/// restore directory.
///
/// Backslashes count as separators, a drive colon is dropped (`C:\a`
/// becomes `C/a`), and root, `.` and `..` components are removed. Returns
/// `None` if nothing remains.
pub fn sanitize_path(recorded: &Path) -> Option<PathBuf> {
    let text = recorded.to_string_lossy().replace('\\', "/");
    let mut chars = text.chars();
    let text = match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("{}{}", drive, chars.as_str())
        }
        _ => text,
    };

    let relative: PathBuf = Path::new(&text)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn destination_for(recorded: &Path, destination: &RestoreDestination) -> Result<PathBuf> {
    match destination {
        RestoreDestination::Origin => Ok(recorded.to_path_buf()),
        RestoreDestination::Directory(root) => sanitize_path(recorded)
            .map(|relative| root.join(relative))
            .ok_or_else(|| Error::UnrecordablePath {
                path: recorded.display().to_string(),
                reason: "no restorable path components".to_string(),
            }),
    }
}

fn restore_temp_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(RESTORE_TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Loads the requested snapshot from `repo`.
pub async fn load_source(repo: &Repository, source: &SnapshotSource) -> Result<LoadedSnapshot> {
    match source {
        SnapshotSource::Latest => repo.snapshots().load_latest().await,
        SnapshotSource::Path(path) => {
            // A bare snapshot file name refers to the repository's log.
            let bare = path.parent().is_none_or(|p| p.as_os_str().is_empty());
            if bare && !fs::try_exists(path).await? {
                if let Some(name) = path.to_str() {
                    return repo.snapshots().load_by_name(name).await;
                }
            }
            repo.snapshots().load_at(path).await
        }
    }
}

/// Restores every entry of a snapshot.
///
/// Entries are processed in path order. A missing blob, an existing
/// destination with different content, or an I/O error fails that entry
/// only; the rest are still restored.
pub async fn restore(
    repo: &Repository,
    source: &SnapshotSource,
    destination: &RestoreDestination,
    options: &RestoreOptions,
    reporter: &mut dyn ProgressReporter,
) -> Result<RestoreReport> {
    let snapshot = load_source(repo, source).await?;
    info!(
        "Restoring {} entries from {}",
        snapshot.len(),
        snapshot.path.display()
    );
    if let RestoreDestination::Directory(root) = destination {
        fs::create_dir_all(root).await?;
    }

    let mut sizes = Vec::with_capacity(snapshot.len());
    for hash in snapshot.entries.values() {
        let size = fs::metadata(repo.store().blob_path(hash))
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        sizes.push(size);
    }
    let job = JobSize {
        files: snapshot.len() as u64,
        bytes: sizes.iter().sum(),
    };

    let mut report = RestoreReport {
        snapshot: snapshot.path.clone(),
        ..RestoreReport::default()
    };
    let mut progress = ProgressTracker::with_interval(job, reporter, options.progress_interval);

    for ((recorded, hash), size) in snapshot.entries.iter().zip(sizes) {
        let outcome = match destination_for(recorded, destination) {
            Ok(dest) => restore_entry(repo, hash, &dest, options.overwrite).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(EntryOutcome::Restored(bytes)) => {
                report.restored += 1;
                report.bytes += bytes;
            }
            Ok(EntryOutcome::AlreadyPresent) => {
                debug!("{} is already up to date", recorded.display());
                report.already_present += 1;
            }
            Err(e) => {
                warn!("Failed to restore {}: {}", recorded.display(), e);
                report.failures.push(FailureRecord::new(recorded, &e));
            }
        }
        progress.tick(size);
    }
    progress.finish();

    info!(
        "Restore finished: {} restored ({} bytes), {} already present, {} failures",
        report.restored,
        report.bytes,
        report.already_present,
        report.failures.len()
    );
    Ok(report)
}

async fn restore_entry(
    repo: &Repository,
    hash: &ContentHash,
    dest: &Path,
    overwrite: bool,
) -> Result<EntryOutcome> {
    let blob = repo.store().blob_path(hash);
    if !fs::try_exists(&blob).await? {
        return Err(Error::BlobNotFound { hash: hash.to_hex() });
    }

    if let Ok(existing) = fs::symlink_metadata(dest).await {
        if existing.is_file() && hash_file(dest).await? == *hash {
            return Ok(EntryOutcome::AlreadyPresent);
        }
        if !overwrite {
            return Err(Error::DestinationExists {
                path: dest.display().to_string(),
            });
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp = restore_temp_path(dest);
    let file = fs::File::create(&temp).await?;
    match finish_restore(&blob, hash, file, &temp, dest).await {
        Ok(bytes) => Ok(EntryOutcome::Restored(bytes)),
        Err(e) => {
            discard_temp(&temp).await;
            Err(e)
        }
    }
}

/// Fills the temp file, checks its digest and moves it into place. The
/// caller removes `temp` if this fails.
async fn finish_restore(
    blob: &Path,
    hash: &ContentHash,
    file: fs::File,
    temp: &Path,
    dest: &Path,
) -> Result<u64> {
    let (actual, bytes) = copy_hashed(blob, file).await?;
    if actual != *hash {
        return Err(Error::ContentChanged {
            path: blob.display().to_string(),
            expected: hash.to_hex(),
            actual: actual.to_hex(),
        });
    }

    preserve_metadata(blob, temp).await;
    fs::rename(temp, dest).await?;
    Ok(bytes)
}
