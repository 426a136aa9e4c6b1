use crate::{ContentHash, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// Hashes the full contents of the file at `path`.
pub async fn hash_file<P: AsRef<Path>>(path: P) -> Result<ContentHash> {
    let file = fs::File::open(path.as_ref()).await?;
    let (hash, _) = hash_reader(file).await?;
    Ok(hash)
}

/// Hashes everything `reader` yields, returning the digest and the number
/// of bytes read.
pub async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> Result<(ContentHash, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((ContentHash::from_hasher(hasher), total))
}

/// Streams `source` into the already-created `dest`, hashing the bytes as
/// they are written. `dest` is synced to disk before returning.
pub(crate) async fn copy_hashed(source: &Path, mut dest: fs::File) -> Result<(ContentHash, u64)> {
    let mut reader = fs::File::open(source).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        dest.write_all(&buffer[..n]).await?;
        total += n as u64;
    }

    dest.flush().await?;
    dest.sync_all().await?;
    Ok((ContentHash::from_hasher(hasher), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_file_matches_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let hash = hash_file(&path).await.unwrap();
        assert_eq!(hash, ContentHash::from_data(&data));
    }

    #[tokio::test]
    async fn test_hash_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let hash = hash_file(&path).await.unwrap();
        assert_eq!(
            hash.to_hex(),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
    }

    #[tokio::test]
    async fn test_copy_hashed_reports_digest_of_copied_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let dest = dir.path().join("dest");
        std::fs::write(&source, b"copy me").unwrap();

        let file = fs::File::create(&dest).await.unwrap();
        let (hash, bytes) = copy_hashed(&source, file).await.unwrap();

        assert_eq!(bytes, 7);
        assert_eq!(hash, ContentHash::from_data(b"copy me"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"copy me");
    }

    #[tokio::test]
    async fn test_hash_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = hash_file(dir.path().join("nope")).await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
