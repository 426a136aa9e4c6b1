use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Repository not found at {path}")]
    RepositoryNotFound { path: String },

    #[error("Checklist file not found: {path}")]
    ChecklistNotFound { path: String },

    #[error("Checklist root does not exist: {path}")]
    TargetRootMissing { path: String },

    #[error("No sealed snapshots found in {path} ({unsealed} unsealed snapshot(s) ignored)")]
    NoSnapshotsFound { path: String, unsealed: usize },

    #[error(
        "Snapshot file already exists: {path}. Check that the system clock is operating normally and try again"
    )]
    DuplicateSnapshot { path: String },

    #[error(
        "Temporary blob path already exists, refusing to overwrite: {path}. The system clock may be misbehaving or another backup session is running"
    )]
    ClockOrCollision { path: String },

    #[error("Cannot commit blob {hash}: {reason}")]
    BlobCommit { hash: String, reason: String },

    #[error("Blob not found: {hash}")]
    BlobNotFound { hash: String },

    #[error("Content of {path} changed while copying (expected {expected}, got {actual})")]
    ContentChanged {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Destination already exists with different content: {path}")]
    DestinationExists { path: String },

    #[error("Path cannot be recorded in a snapshot ({reason}): {path}")]
    UnrecordablePath { path: String, reason: String },

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Invalid snapshot file name: {0}")]
    InvalidSnapshotName(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that must abort a whole session instead of being recorded
    /// against a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ClockOrCollision { .. }
                | Error::DuplicateSnapshot { .. }
                | Error::NoSnapshotsFound { .. }
                | Error::RepositoryNotFound { .. }
                | Error::ChecklistNotFound { .. }
                | Error::TargetRootMissing { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let collision = Error::ClockOrCollision {
            path: "files/temp-AB-2024.tmp".to_string(),
        };
        assert!(collision.is_fatal());

        let missing = Error::BlobNotFound {
            hash: "AB".to_string(),
        };
        assert!(!missing.is_fatal());

        let io = Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!io.is_fatal());
    }
}
