use crate::{ContentHash, Error, FailureRecord, Result, SessionToken};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Separates the original path from the hash on every snapshot line.
///
/// Chosen because it practically never occurs in real paths; paths that do
/// contain it are refused at append time rather than written ambiguously.
pub const SEPARATOR: &str = " /// ";

pub const SNAPSHOT_PREFIX: &str = "snapshot-";
pub const SNAPSHOT_EXTENSION: &str = ".txt";
pub const SEAL_EXTENSION: &str = ".sealed";

/// Fixed-width, so file names sort in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const SEAL_FORMAT_VERSION: u32 = 1;
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Path to hash mapping of one snapshot.
pub type SnapshotMap = BTreeMap<PathBuf, ContentHash>;

/// Second-granularity UTC time of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotTimestamp(NaiveDateTime);

impl SnapshotTimestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self(time.naive_utc().trunc_subsecs(0))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }

    pub fn session_token(&self) -> SessionToken {
        SessionToken::new(self.to_string())
    }

    pub fn file_name(&self) -> String {
        format!("{}{}{}", SNAPSHOT_PREFIX, self, SNAPSHOT_EXTENSION)
    }
}

impl fmt::Display for SnapshotTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for SnapshotTimestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // chrono accepts shorter fields than the format's width, which would
        // break the sort order, so insist on the exact width too.
        if s.len() != 19 {
            return Err(Error::InvalidSnapshotName(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|_| Error::InvalidSnapshotName(s.to_string()))
    }
}

impl Serialize for SnapshotTimestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A snapshot file found in the snapshot directory.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub timestamp: SnapshotTimestamp,
    pub sealed: bool,
}

impl SnapshotInfo {
    /// Parses `snapshot-<timestamp>.txt`; anything else is not a snapshot.
    pub fn parse_name(name: &str) -> Result<SnapshotTimestamp> {
        name.strip_prefix(SNAPSHOT_PREFIX)
            .and_then(|rest| rest.strip_suffix(SNAPSHOT_EXTENSION))
            .ok_or_else(|| Error::InvalidSnapshotName(name.to_string()))?
            .parse()
    }

    pub fn seal_path(&self) -> PathBuf {
        seal_path_for(&self.path)
    }
}

/// Companion record whose presence marks a snapshot as a complete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealRecord {
    pub format_version: u32,
    pub entries: u64,
    pub failures: Vec<FailureRecord>,
    /// SHA-256 of the snapshot file's exact bytes.
    pub digest: ContentHash,
    pub hostname: String,
    pub sealed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealCheck {
    Unsealed,
    Intact,
    Mismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
}

/// A parsed snapshot file.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub path: PathBuf,
    pub timestamp: Option<SnapshotTimestamp>,
    pub sealed: bool,
    pub entries: SnapshotMap,
    pub skipped_lines: usize,
}

impl LoadedSnapshot {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn seal_path_for(snapshot: &Path) -> PathBuf {
    let mut name = OsString::from(snapshot.as_os_str());
    name.push(SEAL_EXTENSION);
    PathBuf::from(name)
}

/// Returns the path as it will appear in a snapshot line, or the reason it
/// cannot be written there unambiguously.
pub fn recordable_path(path: &Path) -> Result<&str> {
    let unrecordable = |reason: &str| Error::UnrecordablePath {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let text = path.to_str().ok_or_else(|| unrecordable("not valid UTF-8"))?;
    if text.is_empty() {
        return Err(unrecordable("empty path"));
    }
    if text.contains(['\n', '\r']) {
        return Err(unrecordable("contains a line break"));
    }
    if text.contains(SEPARATOR) {
        return Err(unrecordable("contains the snapshot separator"));
    }
    if text.starts_with('\u{feff}') {
        return Err(unrecordable("starts with a byte order mark"));
    }
    Ok(text)
}

/// Renders one snapshot line, including the trailing newline.
pub fn format_record(path: &Path, hash: &ContentHash) -> Result<String> {
    Ok(format!("{}{}{}\n", recordable_path(path)?, SEPARATOR, hash))
}

/// Parses snapshot file contents.
///
/// A leading byte order mark is stripped. Lines that do not split into
/// exactly two fields, have an empty path, carry an unparseable hash, or are
/// not UTF-8 are skipped with a warning. Later lines win over earlier ones
/// for the same path. Returns the mapping and the number of skipped lines.
pub fn parse_snapshot(data: &[u8], origin: &Path) -> (SnapshotMap, usize) {
    let data = data.strip_prefix(BOM).unwrap_or(data);
    let mut entries = SnapshotMap::new();
    let mut skipped = 0;

    for (index, raw) in data.split(|b| *b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        let line_no = index + 1;

        let Ok(line) = std::str::from_utf8(raw) else {
            warn!("Skipping non UTF-8 line {} in snapshot {}", line_no, origin.display());
            skipped += 1;
            continue;
        };

        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if fields.len() != 2 || fields[0].is_empty() {
            warn!(
                "Skipping malformed line {} in snapshot {}: {}",
                line_no,
                origin.display(),
                line
            );
            skipped += 1;
            continue;
        }

        match fields[1].parse::<ContentHash>() {
            Ok(hash) => {
                entries.insert(PathBuf::from(fields[0]), hash);
            }
            Err(_) => {
                warn!(
                    "Skipping line {} with invalid hash in snapshot {}: {}",
                    line_no,
                    origin.display(),
                    line
                );
                skipped += 1;
            }
        }
    }

    (entries, skipped)
}

/// Reads and parses any snapshot file, sealed or not.
pub async fn load_snapshot_file<P: AsRef<Path>>(path: P) -> Result<LoadedSnapshot> {
    let path = path.as_ref().to_path_buf();
    let data = fs::read(&path).await?;
    let (entries, skipped_lines) = parse_snapshot(&data, &path);

    let timestamp = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| SnapshotInfo::parse_name(n).ok());
    let sealed = fs::try_exists(seal_path_for(&path)).await?;
    if !sealed {
        warn!("Snapshot {} is not sealed and may be incomplete", path.display());
    }

    debug!("Loaded {} entries from {} ({} skipped)", entries.len(), path.display(), skipped_lines);
    Ok(LoadedSnapshot {
        path,
        timestamp,
        sealed,
        entries,
        skipped_lines,
    })
}

/// The snapshot directory of a repository.
#[derive(Debug, Clone)]
pub struct SnapshotLog {
    dir: PathBuf,
}

impl SnapshotLog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, timestamp: &SnapshotTimestamp) -> PathBuf {
        self.dir.join(timestamp.file_name())
    }

    /// Creates the snapshot file for `timestamp`. An existing file for the
    /// same second is a fatal [`Error::DuplicateSnapshot`].
    pub async fn begin_snapshot(&self, timestamp: SnapshotTimestamp) -> Result<SnapshotWriter> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.snapshot_path(&timestamp);

        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateSnapshot {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!("Creating snapshot file {}", path.display());
        Ok(SnapshotWriter {
            info: SnapshotInfo {
                name: timestamp.file_name(),
                path,
                timestamp,
                sealed: false,
            },
            file,
            hasher: Sha256::new(),
            entries: 0,
        })
    }

    /// Every snapshot file in the directory, oldest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(snapshots);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(timestamp) = SnapshotInfo::parse_name(&name) else {
                continue;
            };
            let path = entry.path();
            let sealed = fs::try_exists(seal_path_for(&path)).await?;
            snapshots.push(SnapshotInfo {
                name,
                path,
                timestamp,
                sealed,
            });
        }

        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }

    /// The sealed snapshot with the greatest file name.
    pub async fn latest_sealed(&self) -> Result<SnapshotInfo> {
        let snapshots = self.list_snapshots().await?;
        let unsealed = snapshots.iter().filter(|s| !s.sealed).count();

        snapshots
            .into_iter()
            .filter(|s| s.sealed)
            .max_by(|a, b| a.name.cmp(&b.name))
            .ok_or_else(|| Error::NoSnapshotsFound {
                path: self.dir.display().to_string(),
                unsealed,
            })
    }

    pub async fn load_latest(&self) -> Result<LoadedSnapshot> {
        let latest = self.latest_sealed().await?;
        info!("Latest snapshot appears to be {}", latest.path.display());
        load_snapshot_file(&latest.path).await
    }

    /// Loads a snapshot file from this log's directory by file name.
    pub async fn load_by_name(&self, name: &str) -> Result<LoadedSnapshot> {
        SnapshotInfo::parse_name(name)?;
        load_snapshot_file(self.dir.join(name)).await
    }

    pub async fn load_at<P: AsRef<Path>>(&self, path: P) -> Result<LoadedSnapshot> {
        load_snapshot_file(path).await
    }

    pub async fn read_seal(&self, snapshot: &Path) -> Result<Option<SealRecord>> {
        let seal_path = seal_path_for(snapshot);
        if !fs::try_exists(&seal_path).await? {
            return Ok(None);
        }
        let data = fs::read(&seal_path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Recomputes a snapshot file's digest and compares it with its seal.
    pub async fn verify_seal(&self, snapshot: &Path) -> Result<SealCheck> {
        let Some(seal) = self.read_seal(snapshot).await? else {
            return Ok(SealCheck::Unsealed);
        };
        let actual = crate::hasher::hash_file(snapshot).await?;
        if actual == seal.digest {
            Ok(SealCheck::Intact)
        } else {
            Ok(SealCheck::Mismatch {
                expected: seal.digest,
                actual,
            })
        }
    }
}

/// Append handle for a snapshot being written.
///
/// Dropping the writer without calling [`SnapshotWriter::seal`] leaves an
/// unsealed snapshot, which loaders never treat as the latest run.
pub struct SnapshotWriter {
    info: SnapshotInfo,
    file: fs::File,
    hasher: Sha256,
    entries: u64,
}

impl SnapshotWriter {
    pub fn info(&self) -> &SnapshotInfo {
        &self.info
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Writes one record and syncs it to disk before returning.
    pub async fn append(&mut self, path: &Path, hash: &ContentHash) -> Result<()> {
        let line = format_record(path, hash)?;
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.hasher.update(line.as_bytes());
        self.entries += 1;
        Ok(())
    }

    /// Marks the snapshot complete by writing its seal record.
    pub async fn seal(mut self, failures: Vec<FailureRecord>) -> Result<SealRecord> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let record = SealRecord {
            format_version: SEAL_FORMAT_VERSION,
            entries: self.entries,
            failures,
            digest: ContentHash::from_hasher(self.hasher),
            hostname,
            sealed_at: Utc::now(),
        };

        let seal_path = self.info.seal_path();
        let mut temp_name = OsString::from(seal_path.as_os_str());
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let data = serde_json::to_vec_pretty(&record)?;
        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(&data).await?;
        temp.sync_all().await?;
        drop(temp);
        fs::rename(&temp_path, &seal_path).await?;

        info!("Sealed snapshot {} with {} entries", self.info.name, record.entries);
        Ok(record)
    }
}
