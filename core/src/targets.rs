use crate::{Error, FailureRecord, Result, TargetFile};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DISCOVERY_LOG_EVERY: u64 = 20_000;

/// Files selected by a checklist, in processing order.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    pub files: Vec<TargetFile>,
    /// Entries found while walking that could not be inspected.
    pub unreadable: Vec<FailureRecord>,
}

impl TargetSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Reads checklist roots, one per line. A leading byte order mark, trailing
/// carriage returns and blank lines are dropped.
pub async fn read_checklist<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::ChecklistNotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    Ok(parse_checklist(&text))
}

pub fn parse_checklist(text: &str) -> Vec<PathBuf> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut seen = BTreeSet::new();
    let mut roots = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if seen.insert(line.to_string()) {
            roots.push(PathBuf::from(line));
        }
    }
    roots
}

/// Expands checklist roots into the set of files beneath them.
///
/// A root may be a file or a directory. Paths are made absolute without
/// resolving symlinks; symlinks to files are included with the size of
/// their target, symlinks to directories are not descended into. The same
/// path reached from overlapping roots is kept once, with the size seen
/// last. A root that does not exist is fatal.
pub fn resolve_targets(roots: &[PathBuf]) -> Result<TargetSet> {
    let mut files = BTreeSet::new();
    let mut unreadable = Vec::new();
    let mut discovered = 0u64;

    for root in roots {
        let root = std::path::absolute(root)?;
        if let Err(e) = std::fs::symlink_metadata(&root) {
            if e.kind() == ErrorKind::NotFound {
                return Err(Error::TargetRootMissing {
                    path: root.display().to_string(),
                });
            }
            return Err(e.into());
        }

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    warn!("Cannot read {}: {}", path.display(), e);
                    unreadable.push(FailureRecord::new(path, e));
                    continue;
                }
            };

            discovered += 1;
            if discovered % DISCOVERY_LOG_EVERY == 0 {
                info!("{} files discovered", discovered);
            }

            if entry.file_type().is_dir() {
                continue;
            }

            // Follows symlinks, so a link to a directory reports a directory.
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot stat {}: {}", entry.path().display(), e);
                    unreadable.push(FailureRecord::new(entry.path(), e));
                    continue;
                }
            };
            if metadata.is_dir() {
                debug!("Not following directory symlink {}", entry.path().display());
                continue;
            }

            files.replace(TargetFile::new(entry.into_path(), metadata.len()));
        }
    }

    Ok(TargetSet {
        files: files.into_iter().collect(),
        unreadable,
    })
}

/// Reads a checklist and resolves it in one step.
pub async fn resolve_checklist<P: AsRef<Path>>(checklist: P) -> Result<TargetSet> {
    let roots = read_checklist(checklist).await?;
    info!("Checklist: walking through {} file tree(s)", roots.len());
    let targets = resolve_targets(&roots)?;
    info!(
        "Checklist resolved to {} files ({} unreadable entries)",
        targets.files.len(),
        targets.unreadable.len()
    );
    Ok(targets)
}
