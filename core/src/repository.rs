use crate::snapshot::SnapshotLog;
use crate::store::ContentStore;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const FILES_DIR: &str = "files";
pub const SNAPSHOTS_DIR: &str = "filepath-snapshots";

/// A backup repository on local disk.
///
/// # Repository Structure
///
/// ```text
/// repository/
/// ├── files/                   # Blobs, named by the SHA-256 of their bytes
/// │   └── temp-<hash>-<session>.tmp   # In-flight copies, never counted as blobs
/// └── filepath-snapshots/      # One text file per backup run
///     ├── snapshot-<uuuu-MM-dd-HH-mm-ss>.txt
///     └── snapshot-<uuuu-MM-dd-HH-mm-ss>.txt.sealed
/// ```
///
/// A repository only tracks directories; it holds no open handles, so it
/// is cheap to clone and pass around.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
    store: ContentStore,
    snapshots: SnapshotLog,
}

impl Repository {
    /// Opens the repository rooted at `path`, which must be an existing
    /// directory. Subdirectories are created lazily by [`Repository::prepare`].
    ///
    /// # Errors
    ///
    /// Returns `Error::RepositoryNotFound` if `path` is not a directory.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let is_dir = fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(Error::RepositoryNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(Self::at(path))
    }

    /// Opens `path`, creating it and its subdirectories as needed.
    pub async fn init<P: AsRef<Path>>(path: P) -> Result<Self> {
        fs::create_dir_all(path.as_ref()).await?;
        let repo = Self::at(path.as_ref().to_path_buf());
        repo.prepare().await?;
        Ok(repo)
    }

    fn at(path: PathBuf) -> Self {
        Self {
            store: ContentStore::new(path.join(FILES_DIR)),
            snapshots: SnapshotLog::new(path.join(SNAPSHOTS_DIR)),
            path,
        }
    }

    /// Creates the blob and snapshot directories. Does nothing if they exist.
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(self.store.dir()).await?;
        fs::create_dir_all(self.snapshots.dir()).await?;
        debug!("Repository layout ready at {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            Repository::open(&missing).await,
            Err(Error::RepositoryNotFound { .. })
        ));

        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(Repository::open(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).await.unwrap();

        assert!(repo.path().join(FILES_DIR).is_dir());
        assert!(repo.path().join(SNAPSHOTS_DIR).is_dir());
        assert_eq!(repo.store().dir(), repo.path().join(FILES_DIR));

        let reopened = Repository::open(repo.path()).await.unwrap();
        assert_eq!(reopened.snapshots().dir(), repo.snapshots().dir());
    }
}
