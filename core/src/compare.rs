use crate::snapshot::{SnapshotMap, load_snapshot_file};
use crate::{ContentHash, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum Change {
    Added { hash: ContentHash },
    Removed { hash: ContentHash },
    Unchanged { hash: ContentHash },
    Modified { before: ContentHash, after: ContentHash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: PathBuf,
    #[serde(flatten)]
    pub change: Change,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
    pub unchanged: u64,
}

/// Per-path differences between two snapshots, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub entries: Vec<DiffEntry>,
}

impl SnapshotDiff {
    pub fn counts(&self) -> DiffCounts {
        let mut counts = DiffCounts::default();
        for entry in &self.entries {
            match entry.change {
                Change::Added { .. } => counts.added += 1,
                Change::Removed { .. } => counts.removed += 1,
                Change::Modified { .. } => counts.modified += 1,
                Change::Unchanged { .. } => counts.unchanged += 1,
            }
        }
        counts
    }

    /// Entries other than `Unchanged`.
    pub fn changes(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.change, Change::Unchanged { .. }))
    }

    pub fn is_identical(&self) -> bool {
        self.changes().next().is_none()
    }
}

/// Classifies every path of `older` and `newer`.
pub fn compare_snapshots(older: &SnapshotMap, newer: &SnapshotMap) -> SnapshotDiff {
    let mut entries = Vec::with_capacity(older.len().max(newer.len()));
    let mut a = older.iter().peekable();
    let mut b = newer.iter().peekable();

    // Both maps iterate in path order, so a single merge pass suffices.
    loop {
        let order = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((pa, _)), Some((pb, _))) => pa.cmp(pb),
        };

        let entry = match order {
            Ordering::Less => {
                let Some((path, hash)) = a.next() else { break };
                DiffEntry {
                    path: path.clone(),
                    change: Change::Removed { hash: *hash },
                }
            }
            Ordering::Greater => {
                let Some((path, hash)) = b.next() else { break };
                DiffEntry {
                    path: path.clone(),
                    change: Change::Added { hash: *hash },
                }
            }
            Ordering::Equal => {
                let (Some((path, before)), Some((_, after))) = (a.next(), b.next()) else {
                    break;
                };
                let change = if before == after {
                    Change::Unchanged { hash: *before }
                } else {
                    Change::Modified {
                        before: *before,
                        after: *after,
                    }
                };
                DiffEntry {
                    path: path.clone(),
                    change,
                }
            }
        };
        entries.push(entry);
    }

    SnapshotDiff { entries }
}

/// Loads two snapshot files and compares them.
pub async fn compare_snapshot_files<P: AsRef<Path>, Q: AsRef<Path>>(
    older: P,
    newer: Q,
) -> Result<SnapshotDiff> {
    let older = load_snapshot_file(older).await?;
    let newer = load_snapshot_file(newer).await?;
    Ok(compare_snapshots(&older.entries, &newer.entries))
}
