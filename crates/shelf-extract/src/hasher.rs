//! SHA-256 content hashing of attachment files.

use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use shelf_core::error::ShelfError;

use crate::ContentHasher;

/// Hex-encoded SHA-256 over the full file contents.
#[derive(Debug, Default, Clone)]
pub struct Sha256Hasher;

impl Sha256Hasher {
    pub fn digest_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ContentHasher for Sha256Hasher {
    async fn hash(&self, file: &Path) -> Result<String, ShelfError> {
        let bytes = tokio::fs::read(file).await?;
        Ok(Self::digest_bytes(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Sha256Hasher::digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"version one").unwrap();
        let first = Sha256Hasher.hash(&path).await.unwrap();

        std::fs::write(&path, b"version two").unwrap();
        let second = Sha256Hasher.hash(&path).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }
}
