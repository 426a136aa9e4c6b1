use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

/// SHA-256 digest of a file's bytes.
///
/// Rendered as 64 uppercase hex characters, which is also the blob's file
/// name inside the repository. Parsing accepts either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn short_string(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut array = [0u8; 32];
        hex::decode_to_slice(s, &mut array).map_err(|_| Error::InvalidHash(s.to_string()))?;
        Ok(Self(array))
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One concrete file selected for backup.
///
/// Equality and ordering look at `path` only. Two observations of the same
/// path with different sizes describe one file that changed, so only one of
/// them may survive in a target set. Ordering is byte-wise on the path
/// string, which fixes the order records are appended to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl TargetFile {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

impl PartialEq for TargetFile {
    fn eq(&self, other: &Self) -> bool {
        self.path.as_os_str() == other.path.as_os_str()
    }
}

impl Eq for TargetFile {}

impl PartialOrd for TargetFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.as_os_str().cmp(other.path.as_os_str())
    }
}

impl std::hash::Hash for TargetFile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self.path.as_os_str(), state);
    }
}

/// Identifies one backup session in temporary artifact names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Total amount of work in a run, in files and bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSize {
    pub files: u64,
    pub bytes: u64,
}

impl JobSize {
    pub fn of(targets: &[TargetFile]) -> Self {
        Self {
            files: targets.len() as u64,
            bytes: targets.iter().map(|t| t.size_bytes).sum(),
        }
    }
}

/// A file that could not be processed, with the reason as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub error: String,
}

impl FailureRecord {
    pub fn new(path: impl Into<PathBuf>, error: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            error: error.to_string(),
        }
    }
}
