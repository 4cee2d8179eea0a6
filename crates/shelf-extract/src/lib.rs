//! Shelf extract crate - text extraction and content hashing collaborators.
//!
//! Provides the `TextExtractor` and `ContentHasher` traits consumed by the
//! full-text cache, a plain-text extractor, a SHA-256 file hasher, and
//! deterministic mocks for tests.

pub mod hasher;
pub mod plain;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use shelf_core::error::ShelfError;

pub use hasher::Sha256Hasher;
pub use plain::PlainTextExtractor;

/// Extracts searchable text from a paper's primary file.
///
/// Implementations wrap format-specific engines (PDF, HTML, plain text)
/// behind a uniform async interface.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of `file`. May be empty when nothing is found.
    async fn extract(&self, file: &Path) -> Result<String, ShelfError>;
}

/// Computes a stable digest of a file's bytes for staleness detection.
#[async_trait]
pub trait ContentHasher: Send + Sync {
    async fn hash(&self, file: &Path) -> Result<String, ShelfError>;
}

/// Mock extractor for testing.
///
/// Returns canned text per file name (or a default) and counts how many
/// extractions were performed.
#[derive(Debug, Default)]
pub struct MockTextExtractor {
    by_file: HashMap<String, String>,
    default_text: String,
    calls: AtomicUsize,
}

impl MockTextExtractor {
    /// Create a mock that returns `text` for every file.
    pub fn with_text(text: &str) -> Self {
        Self {
            default_text: text.to_string(),
            ..Default::default()
        }
    }

    /// Return `text` for files whose name is `file_name`.
    pub fn with_file(mut self, file_name: &str, text: &str) -> Self {
        self.by_file.insert(file_name.to_string(), text.to_string());
        self
    }

    /// Number of `extract` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for MockTextExtractor {
    async fn extract(&self, file: &Path) -> Result<String, ShelfError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(ShelfError::Extraction("No file name".to_string()));
        }
        Ok(self
            .by_file
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default_text.clone()))
    }
}

/// Mock hasher that derives the digest from the file name alone.
#[derive(Debug, Default, Clone)]
pub struct MockHasher;

#[async_trait]
impl ContentHasher for MockHasher {
    async fn hash(&self, file: &Path) -> Result<String, ShelfError> {
        Ok(format!("mock:{}", file.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_extractor_default_text() {
        let extractor = MockTextExtractor::with_text("lorem ipsum");
        let text = extractor.extract(Path::new("/lib/a.pdf")).await.unwrap();
        assert_eq!(text, "lorem ipsum");
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_extractor_per_file() {
        let extractor = MockTextExtractor::with_text("fallback").with_file("b.pdf", "specific");
        assert_eq!(
            extractor.extract(Path::new("/lib/b.pdf")).await.unwrap(),
            "specific"
        );
        assert_eq!(
            extractor.extract(Path::new("/lib/c.pdf")).await.unwrap(),
            "fallback"
        );
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_extractor_rejects_empty_path() {
        let extractor = MockTextExtractor::default();
        assert!(extractor.extract(Path::new("")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_hasher_is_deterministic() {
        let hasher = MockHasher;
        let a = hasher.hash(Path::new("x.pdf")).await.unwrap();
        let b = hasher.hash(Path::new("x.pdf")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, hasher.hash(Path::new("y.pdf")).await.unwrap());
    }
}
