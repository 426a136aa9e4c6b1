use crate::ContentHash;
use crate::snapshot::SnapshotMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Entry counts of a snapshot, independent of any size threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub total_entries: u64,
    pub unique_hashes: u64,
    /// Entries beyond the first for each hash.
    pub duplicate_count: u64,
}

/// Paths in one snapshot that share the same content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    /// Live size on disk at analysis time.
    pub size: u64,
    pub paths: BTreeSet<PathBuf>,
}

impl DuplicateGroup {
    /// Bytes that would be saved if only one copy were kept.
    pub fn redundant_bytes(&self) -> u64 {
        self.size * (self.paths.len() as u64).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub summary: DuplicateSummary,
    pub threshold: u64,
    /// Sorted by size, smallest first.
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    pub fn largest(&self) -> Option<&DuplicateGroup> {
        self.groups.last()
    }
}

fn reverse_index(entries: &SnapshotMap) -> HashMap<ContentHash, BTreeSet<PathBuf>> {
    let mut by_hash: HashMap<ContentHash, BTreeSet<PathBuf>> = HashMap::new();
    for (path, hash) in entries {
        by_hash.entry(*hash).or_default().insert(path.clone());
    }
    by_hash
}

pub fn summarize(entries: &SnapshotMap) -> DuplicateSummary {
    let total_entries = entries.len() as u64;
    let unique_hashes = reverse_index(entries).len() as u64;
    DuplicateSummary {
        total_entries,
        unique_hashes,
        duplicate_count: total_entries - unique_hashes,
    }
}

/// Finds content shared by more than one path, reporting groups whose live
/// size is at least `threshold` bytes.
///
/// Sizes are read from the original paths now, not from the snapshot. A
/// group none of whose paths still exist is left out of the report but is
/// still counted in the summary.
pub fn find_duplicates(entries: &SnapshotMap, threshold: u64) -> DuplicateReport {
    find_duplicates_with(entries, threshold, |path| {
        std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    })
}

pub(crate) fn find_duplicates_with<F>(
    entries: &SnapshotMap,
    threshold: u64,
    live_size: F,
) -> DuplicateReport
where
    F: Fn(&Path) -> Option<u64>,
{
    let summary = summarize(entries);

    let mut groups: Vec<DuplicateGroup> = reverse_index(entries)
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .filter_map(|(hash, paths)| {
            let size = paths.iter().find_map(|p| live_size(p.as_path()))?;
            (size >= threshold).then_some(DuplicateGroup { hash, size, paths })
        })
        .collect();

    groups.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.hash.cmp(&b.hash)));

    DuplicateReport {
        summary,
        threshold,
        groups,
    }
}
