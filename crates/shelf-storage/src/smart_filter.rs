//! Saved queries.
//!
//! A saved filter shares the categorizer row layout but nothing links to it,
//! so its `count` is not a reference count. It is written as
//! [`SAVED_FILTER_COUNT`] and never changes.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use shelf_core::error::ShelfError;
use shelf_core::types::{SmartFilter, SortOrder};

use crate::db::{row_uuid, sql_err, Database};

/// Stored `count` of every saved filter.
pub const SAVED_FILTER_COUNT: i64 = 1;

pub struct SmartFilterRepository {
    db: Arc<Database>,
}

impl SmartFilterRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn load(&self, order: SortOrder) -> Result<Vec<SmartFilter>, ShelfError> {
        let sql = format!(
            "SELECT id, name, filter, color, count FROM smart_filters ORDER BY name {}",
            order.as_sql()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare smart filter load"))?;
            let rows = stmt
                .query_map([], read_row)
                .map_err(sql_err("load smart filters"))?;
            let mut filters = Vec::new();
            for row in rows {
                filters.push(row.map_err(sql_err("read smart filter"))?);
            }
            Ok(filters)
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<SmartFilter>, ShelfError> {
        self.db.with_conn(|conn| by_name(conn, name))
    }

    /// Save a filter. Returns false when the name is already taken.
    pub fn insert(&self, name: &str, filter: &str, color: Option<&str>) -> Result<bool, ShelfError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ShelfError::InvalidArgument(
                "smart filter name must not be empty".into(),
            ));
        }
        let partition = self.db.partition().map(str::to_string);
        self.db.safe_write(|conn| {
            if by_name(conn, name)?.is_some() {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO smart_filters (id, partition, name, filter, color, count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    Uuid::now_v7().to_string(),
                    partition,
                    name,
                    filter,
                    color,
                    SAVED_FILTER_COUNT
                ],
            )
            .map_err(sql_err("insert smart filter"))?;
            Ok(true)
        })
    }

    pub fn delete(&self, name: &str) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM smart_filters WHERE name = ?1",
                    rusqlite::params![name],
                )
                .map_err(sql_err("delete smart filter"))?;
            Ok(deleted > 0)
        })
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| {
            if old_name != new_name && by_name(conn, new_name)?.is_some() {
                return Err(ShelfError::InvalidArgument(format!(
                    "smart filter '{}' already exists",
                    new_name
                )));
            }
            let updated = conn
                .execute(
                    "UPDATE smart_filters SET name = ?1 WHERE name = ?2",
                    rusqlite::params![new_name, old_name],
                )
                .map_err(sql_err("rename smart filter"))?;
            Ok(updated > 0)
        })
    }

    pub fn colorize(&self, name: &str, color: &str) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| {
            let updated = conn
                .execute(
                    "UPDATE smart_filters SET color = ?1 WHERE name = ?2",
                    rusqlite::params![color, name],
                )
                .map_err(sql_err("colorize smart filter"))?;
            Ok(updated > 0)
        })
    }
}

fn by_name(conn: &Connection, name: &str) -> Result<Option<SmartFilter>, ShelfError> {
    conn.query_row(
        "SELECT id, name, filter, color, count FROM smart_filters WHERE name = ?1",
        rusqlite::params![name],
        read_row,
    )
    .optional()
    .map_err(sql_err("find smart filter"))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SmartFilter> {
    Ok(SmartFilter {
        id: row_uuid(row, 0)?,
        name: row.get(1)?,
        filter: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        color: row.get(3)?,
        count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
    })
}
