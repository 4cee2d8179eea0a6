//! Plain-text extraction for text-based attachments.
//!
//! Reads the file and returns its contents when they are valid UTF-8.
//! Binary formats are rejected with `ShelfError::Extraction`; callers
//! degrade that to empty text.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use shelf_core::error::ShelfError;

use crate::TextExtractor;

/// Extractor for `.txt`, `.md`, `.tex` and similar UTF-8 files.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    /// Files larger than this are truncated before decoding.
    max_bytes: usize,
}

impl PlainTextExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(8 * 1024 * 1024)
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, file: &Path) -> Result<String, ShelfError> {
        let mut bytes = tokio::fs::read(file).await?;
        if bytes.len() > self.max_bytes {
            debug!(path = %file.display(), size = bytes.len(), "Truncating large file");
            bytes.truncate(self.max_bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                // A truncated multi-byte sequence at the cut is still text.
                let valid = e.utf8_error().valid_up_to();
                if e.utf8_error().error_len().is_none() && valid > 0 {
                    let mut bytes = e.into_bytes();
                    bytes.truncate(valid);
                    return String::from_utf8(bytes)
                        .map_err(|e| ShelfError::Extraction(e.to_string()));
                }
                Err(ShelfError::Extraction(format!(
                    "{} is not a text file",
                    file.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracts_utf8_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Attention is all you need").unwrap();

        let text = PlainTextExtractor::default().extract(&path).await.unwrap();
        assert_eq!(text, "Attention is all you need");
    }

    #[tokio::test]
    async fn test_rejects_binary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, [0x25, 0x50, 0xff, 0xfe, 0x00, 0x81]).unwrap();

        let result = PlainTextExtractor::default().extract(&path).await;
        assert!(matches!(result, Err(ShelfError::Extraction(_))));
    }

    #[tokio::test]
    async fn test_truncates_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.txt");
        std::fs::write(&path, "abcdefghij").unwrap();

        let text = PlainTextExtractor::new(4).extract(&path).await.unwrap();
        assert_eq!(text, "abcd");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = PlainTextExtractor::default()
            .extract(Path::new("/nonexistent/file.txt"))
            .await;
        assert!(matches!(result, Err(ShelfError::Io(_))));
    }
}
