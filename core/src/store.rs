use crate::hasher::{copy_hashed, hash_file};
use crate::{ContentHash, Error, Result, SessionToken};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const TEMP_PREFIX: &str = "temp-";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Names carrying the reserved temp prefix or suffix are never completed blobs.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) || name.ends_with(TEMP_SUFFIX)
}

/// Session-scoped index of the blobs present in a store.
///
/// Built once from a directory scan by [`ContentStore::known_hashes`] and
/// afterwards only grown by [`ContentStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct KnownHashes {
    hashes: HashSet<ContentHash>,
}

impl KnownHashes {
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentHash> {
        self.hashes.iter()
    }

    fn insert(&mut self, hash: ContentHash) {
        self.hashes.insert(hash);
    }
}

/// The blob directory of a repository.
///
/// Every completed entry is named after the SHA-256 of its bytes. New blobs
/// are written under a temporary name first and moved into place only after
/// the copied bytes have been hashed and synced, so a reader of the
/// directory sees either nothing or a whole blob for any given hash.
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }

    pub fn temp_path(&self, hash: &ContentHash, session: &SessionToken) -> PathBuf {
        self.dir
            .join(format!("{}{}-{}{}", TEMP_PREFIX, hash.to_hex(), session, TEMP_SUFFIX))
    }

    /// Checks the directory itself, bypassing any session index.
    pub async fn contains(&self, hash: &ContentHash) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(hash)).await?)
    }

    /// Scans the blob directory for completed blobs.
    pub async fn known_hashes(&self) -> Result<KnownHashes> {
        let mut known = KnownHashes::default();
        if !fs::try_exists(&self.dir).await? {
            return Ok(known);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_temp_name(&name) {
                debug!("Ignoring temporary artifact in blob directory: {}", name);
                continue;
            }
            match name.parse::<ContentHash>() {
                Ok(hash) => known.insert(hash),
                Err(_) => debug!("Ignoring unrecognised entry in blob directory: {}", name),
            }
        }

        debug!("Found {} blobs in {}", known.len(), self.dir.display());
        Ok(known)
    }

    /// Lists temp artifacts left behind by interrupted sessions.
    pub async fn stale_temp_files(&self) -> Result<Vec<PathBuf>> {
        let mut stale = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(stale);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_str().is_some_and(is_temp_name) {
                stale.push(entry.path());
            }
        }
        stale.sort();
        Ok(stale)
    }

    /// Copies `source` into the store as the blob for `hash`.
    ///
    /// The caller must already have checked `known` for `hash`. Returns the
    /// number of bytes stored. A pre-existing temp file for this hash and
    /// session is a fatal [`Error::ClockOrCollision`].
    pub async fn commit(
        &self,
        known: &mut KnownHashes,
        source: &Path,
        hash: &ContentHash,
        session: &SessionToken,
    ) -> Result<u64> {
        if known.contains(hash) {
            return Err(Error::BlobCommit {
                hash: hash.to_hex(),
                reason: "blob is already known to this session".to_string(),
            });
        }

        let final_path = self.blob_path(hash);
        if fs::try_exists(&final_path).await? {
            return Err(Error::BlobCommit {
                hash: hash.to_hex(),
                reason: "a completed blob already exists".to_string(),
            });
        }

        fs::create_dir_all(&self.dir).await?;
        let temp_path = self.temp_path(hash, session);
        let temp_file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ClockOrCollision {
                    path: temp_path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let (actual, bytes) = match copy_hashed(source, temp_file).await {
            Ok(copied) => copied,
            Err(e) => {
                discard_temp(&temp_path).await;
                return Err(e);
            }
        };

        if actual != *hash {
            discard_temp(&temp_path).await;
            return Err(Error::ContentChanged {
                path: source.display().to_string(),
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        preserve_metadata(source, &temp_path).await;

        if let Err(e) = move_no_clobber(&temp_path, &final_path).await {
            discard_temp(&temp_path).await;
            if e.kind() == ErrorKind::AlreadyExists {
                return Err(Error::BlobCommit {
                    hash: hash.to_hex(),
                    reason: "a completed blob appeared while committing".to_string(),
                });
            }
            return Err(e.into());
        }

        known.insert(*hash);
        debug!(
            "Committed blob {} ({} bytes) from {}",
            hash.short_string(),
            bytes,
            source.display()
        );
        Ok(bytes)
    }

    /// Re-hashes a stored blob and returns its actual digest.
    pub async fn audit_blob(&self, hash: &ContentHash) -> Result<ContentHash> {
        let path = self.blob_path(hash);
        if !fs::try_exists(&path).await? {
            return Err(Error::BlobNotFound { hash: hash.to_hex() });
        }
        hash_file(&path).await
    }
}

/// Moves `from` to `to`, failing with `AlreadyExists` instead of replacing
/// an existing `to`.
///
/// A hard link cannot clobber, so it is tried first. Filesystems without
/// hard links get an existence check followed by a plain rename.
async fn move_no_clobber(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::hard_link(from, to).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(from).await {
                warn!("Blob stored but temp file {} could not be removed: {}", from.display(), e);
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!("Hard link unavailable ({}), falling back to rename", e);
            if fs::try_exists(to).await? {
                return Err(std::io::Error::from(ErrorKind::AlreadyExists));
            }
            fs::rename(from, to).await
        }
    }
}

/// Removes a temp artifact, logging anything other than it already being gone.
pub(crate) async fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", path.display(), e);
        }
    }
}

/// Copies modification time and permissions from `source` to `dest`.
/// Failures are logged and otherwise ignored.
pub(crate) async fn preserve_metadata(source: &Path, dest: &Path) {
    let metadata = match fs::metadata(source).await {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Cannot read metadata of {}: {}", source.display(), e);
            return;
        }
    };

    if let Ok(modified) = metadata.modified() {
        let result = std::fs::OpenOptions::new()
            .write(true)
            .open(dest)
            .and_then(|file| file.set_modified(modified));
        if let Err(e) = result {
            debug!("Cannot set modification time on {}: {}", dest.display(), e);
        }
    }

    if let Err(e) = fs::set_permissions(dest, metadata.permissions()).await {
        debug!("Cannot set permissions on {}: {}", dest.display(), e);
    }
}
