use thiserror::Error;

/// Top-level error type for the Shelf data layer.
///
/// Variants follow the recovery policy of the storage core: `Config` and
/// `Open` are fatal and surfaced, `Auth` and `Query` are normally absorbed
/// by the caller with a safe fallback, and the rest bubble up unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Open error: {0}")]
    Open(String),

    #[error("Incompatible schema: store is at version {found}, newest known is {supported}")]
    IncompatibleSchema { found: i64, supported: i64 },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShelfError {
    /// Whether the caller is expected to recover from this error locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ShelfError::Auth(_) | ShelfError::Query(_))
    }
}

impl From<toml::de::Error> for ShelfError {
    fn from(err: toml::de::Error) -> Self {
        ShelfError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ShelfError {
    fn from(err: toml::ser::Error) -> Self {
        ShelfError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ShelfError {
    fn from(err: serde_json::Error) -> Self {
        ShelfError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Shelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShelfError::Config("library dir missing".to_string());
        assert_eq!(err.to_string(), "Configuration error: library dir missing");
    }

    #[test]
    fn test_incompatible_schema_display() {
        let err = ShelfError::IncompatibleSchema {
            found: 9,
            supported: 5,
        };
        assert_eq!(
            err.to_string(),
            "Incompatible schema: store is at version 9, newest known is 5"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let shelf_err: ShelfError = io_err.into();
        assert!(matches!(shelf_err, ShelfError::Io(_)));
        assert!(shelf_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_recoverable_variants() {
        assert!(ShelfError::Auth("bad secret".into()).is_recoverable());
        assert!(ShelfError::Query("unexpected token".into()).is_recoverable());
        assert!(!ShelfError::Open("locked".into()).is_recoverable());
        assert!(!ShelfError::Config("unwritable".into()).is_recoverable());
        assert!(!ShelfError::Storage("disk full".into()).is_recoverable());
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let shelf_err: ShelfError = err.unwrap_err().into();
        assert!(matches!(shelf_err, ShelfError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let shelf_err: ShelfError = err.unwrap_err().into();
        assert!(matches!(shelf_err, ShelfError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(format!("value={}", value))
        }

        assert_eq!(inner().unwrap(), "value=42");
    }
}
