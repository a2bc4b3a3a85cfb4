//! SHA-256 content hashes for downloaded files and captured reference images
//!
//! Hashes are recorded in the sidecar so duplicate downloads can be audited
//! later without re-reading the images.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex SHA-256 of a file's contents
///
/// Reads in 1MB chunks on the blocking pool.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let path_buf = path.to_path_buf();
    tracing::debug!(path = %path_buf.display(), "Calculating SHA-256 hash");

    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(&path_buf).map_err(|e| {
            std::io::Error::new(e.kind(), format!("Failed to open file for hashing: {}", e))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let bytes_read = file.read(&mut buffer).map_err(|e| {
                std::io::Error::new(e.kind(), format!("Failed to read file for hashing: {}", e))
            })?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("Hash task panicked: {}", e)))?
}

/// Hex SHA-256 of an in-memory buffer
pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_bytes_hash() {
        assert_eq!(sha256_bytes(b"abc"), ABC_SHA256);
    }

    #[tokio::test]
    async fn test_file_hash_matches_bytes_hash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), ABC_SHA256);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(sha256_file(&temp.path().join("missing")).await.is_err());
    }
}
