//! Store handle management.
//!
//! Wraps a single rusqlite Connection behind a reentrant lock. Reads go
//! through `with_conn`; every mutation goes through `safe_write`, which opens
//! one transaction per outermost scope and runs nested scopes inline.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::ReentrantMutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};
use tracing::{debug, info};
use uuid::Uuid;

use shelf_core::error::ShelfError;

use crate::migrations::{self, StoreSchema};

struct Inner {
    conn: Connection,
    /// Nesting depth of `safe_write` on the owning thread.
    depth: Cell<u32>,
}

/// A store file (or in-memory store) with its schema applied.
pub struct Database {
    inner: ReentrantMutex<Inner>,
    path: Option<PathBuf>,
    /// Partition tag stamped on rows created in cloud mode.
    partition: Option<String>,
}

/// Resets the scope depth even if the write closure panics.
struct DepthGuard<'a>(&'a Cell<u32>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl Database {
    /// Open (or create) a store at the given path and bring it to the newest
    /// schema.
    ///
    /// Fails with `ShelfError::IncompatibleSchema` when the file was written
    /// by a newer schema than this build knows.
    pub fn open(
        path: &Path,
        schema: StoreSchema,
        partition: Option<String>,
    ) -> Result<Self, ShelfError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ShelfError::Open(format!("Failed to open store: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -32768;",
        )
        .map_err(|e| ShelfError::Open(format!("Failed to set pragmas: {}", e)))?;

        register_functions(&conn)?;
        migrations::run_migrations(&conn, schema)?;
        info!(path = %path.display(), ?schema, "Store opened");

        Ok(Self {
            inner: ReentrantMutex::new(Inner {
                conn,
                depth: Cell::new(0),
            }),
            path: Some(path.to_path_buf()),
            partition,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory(schema: StoreSchema) -> Result<Self, ShelfError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ShelfError::Open(format!("Failed to open in-memory store: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ShelfError::Open(format!("Failed to set pragmas: {}", e)))?;

        register_functions(&conn)?;
        migrations::run_migrations(&conn, schema)?;

        Ok(Self {
            inner: ReentrantMutex::new(Inner {
                conn,
                depth: Cell::new(0),
            }),
            path: None,
            partition: None,
        })
    }

    /// Same store, rows stamped with `partition` on creation.
    pub fn with_partition(mut self, partition: Option<String>) -> Self {
        self.partition = partition;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Execute a read with the underlying connection.
    ///
    /// The lock is held for the duration of the closure, so a read never
    /// observes a write scope that has not committed.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ShelfError>
    where
        F: FnOnce(&Connection) -> Result<T, ShelfError>,
    {
        let inner = self.inner.lock();
        f(&inner.conn)
    }

    /// Execute `f` inside a write scope.
    ///
    /// The outermost call opens a transaction that commits when `f` returns
    /// `Ok` and rolls back otherwise. A call made while a scope is already
    /// open on this thread runs `f` inline in the enclosing transaction.
    pub fn safe_write<F, T>(&self, f: F) -> Result<T, ShelfError>
    where
        F: FnOnce(&Connection) -> Result<T, ShelfError>,
    {
        let inner = self.inner.lock();

        if inner.depth.get() > 0 {
            debug!(depth = inner.depth.get(), "Nested write scope runs inline");
            inner.depth.set(inner.depth.get() + 1);
            let _guard = DepthGuard(&inner.depth);
            return f(&inner.conn);
        }

        inner.depth.set(1);
        let _guard = DepthGuard(&inner.depth);

        let tx = inner
            .conn
            .unchecked_transaction()
            .map_err(|e| ShelfError::Storage(format!("Failed to begin write scope: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| ShelfError::Storage(format!("Failed to commit write scope: {}", e)))?;
        Ok(value)
    }

    /// Whether the calling thread is currently inside a write scope.
    pub fn in_write_scope(&self) -> bool {
        self.inner.lock().depth.get() > 0
    }

    /// Close the connection, flushing the WAL.
    pub fn close(self) -> Result<(), ShelfError> {
        let path = self.path.clone();
        let inner = self.inner.into_inner();
        inner
            .conn
            .close()
            .map_err(|(_, e)| ShelfError::Storage(format!("Failed to close store: {}", e)))?;
        if let Some(path) = path {
            info!(path = %path.display(), "Store closed");
        }
        Ok(())
    }
}

/// Name of the SQL function that lowercases text with full Unicode case
/// folding. SQLite's own `lower()` and `LIKE` only fold ASCII.
pub const FOLD_FUNCTION: &str = "shelf_fold";

/// Register the scalar functions the query layer relies on.
pub(crate) fn register_functions(conn: &Connection) -> Result<(), ShelfError> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let folded = match ctx.get_raw(0) {
                ValueRef::Null => None,
                ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).to_lowercase()),
                ValueRef::Integer(n) => Some(n.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Blob(_) => None,
            };
            Ok(folded)
        },
    )
    .map_err(|e| ShelfError::Open(format!("Failed to register SQL functions: {}", e)))
}

/// Map a rusqlite error into a storage error with context.
pub(crate) fn sql_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ShelfError {
    move |e| ShelfError::Storage(format!("Failed to {}: {}", context, e))
}

/// Read a UUID stored as text.
pub(crate) fn row_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a JSON string list column; NULL reads as empty.
pub(crate) fn row_json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        _ => Ok(Vec::new()),
    }
}

/// Convert unix seconds to a UTC timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("partition", &self.partition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_papers(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
                .map_err(|e| ShelfError::Storage(e.to_string()))
        })
        .unwrap()
    }

    fn insert_raw(conn: &Connection, id: &str) -> Result<(), ShelfError> {
        conn.execute(
            "INSERT INTO papers (id, title, authors) VALUES (?1, 'T', 'A')",
            rusqlite::params![id],
        )
        .map_err(|e| ShelfError::Storage(e.to_string()))?;
        Ok(())
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        assert_eq!(count_papers(&db), 0);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib").join("shelf.db");
        let db = Database::open(&path, StoreSchema::Library, None).unwrap();
        assert_eq!(count_papers(&db), 0);
        assert!(path.exists());
        db.close().unwrap();
    }

    #[test]
    fn test_safe_write_commits() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        db.safe_write(|conn| insert_raw(conn, "a")).unwrap();
        assert_eq!(count_papers(&db), 1);
        assert!(!db.in_write_scope());
    }

    #[test]
    fn test_safe_write_rolls_back_on_error() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        let result: Result<(), ShelfError> = db.safe_write(|conn| {
            insert_raw(conn, "a")?;
            Err(ShelfError::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(count_papers(&db), 0);
        assert!(!db.in_write_scope());
    }

    #[test]
    fn test_nested_safe_write_runs_inline() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        db.safe_write(|conn| {
            insert_raw(conn, "outer")?;
            assert!(db.in_write_scope());
            db.safe_write(|inner| insert_raw(inner, "inner"))?;
            // Still inside the outer scope after the nested call returns.
            assert!(db.in_write_scope());
            Ok(())
        })
        .unwrap();
        assert_eq!(count_papers(&db), 2);
    }

    #[test]
    fn test_nested_failure_rolls_back_whole_scope() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        let result: Result<(), ShelfError> = db.safe_write(|conn| {
            insert_raw(conn, "outer")?;
            db.safe_write(|inner| {
                insert_raw(inner, "inner")?;
                Err(ShelfError::InvalidArgument("inner abort".into()))
            })
        });
        assert!(result.is_err());
        assert_eq!(count_papers(&db), 0);
    }

    #[test]
    fn test_fold_function_handles_unicode() {
        let db = Database::in_memory(StoreSchema::Library).unwrap();
        let (folded, null_is_null, matched): (String, bool, i64) = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT shelf_fold('ÜBER Müller ÉTUDE'), shelf_fold(NULL) IS NULL,
                            instr(shelf_fold('DES RÉSEAUX'), shelf_fold('réseaux'))",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|e| ShelfError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(folded, "über müller étude");
        assert!(null_is_null);
        assert_eq!(matched, 5);
    }

    #[test]
    fn test_partition_is_recorded() {
        let db = Database::in_memory(StoreSchema::Library)
            .unwrap()
            .with_partition(Some("user-42".to_string()));
        assert_eq!(db.partition(), Some("user-42"));
    }
}
