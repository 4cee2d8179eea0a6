//! Ref-counted tag and folder rows.
//!
//! Papers refer to categorizers by name. Linking resolves names through the
//! unique `(kind, name)` index: an existing row is incremented, a missing one
//! is created with a count of one. Unlinking decrements and, unless asked to
//! keep rows, deletes any row whose count reaches zero.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use shelf_core::error::ShelfError;
use shelf_core::types::{Categorizer, CategorizerKind, SortOrder};

use crate::db::{row_uuid, sql_err, Database};

/// What happens to a row whose count drops to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnlinkMode {
    /// Delete the row.
    #[default]
    GarbageCollect,
    /// Keep the row with a count of zero.
    KeepAll,
}

/// Result of an unlink pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkOutcome {
    pub decremented: usize,
    pub deleted: usize,
}

/// Link and unlink categorizer rows on behalf of papers.
pub struct CategorizerLinker {
    db: Arc<Database>,
}

impl CategorizerLinker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve names to rows, incrementing each distinct name once.
    ///
    /// Names are trimmed, empty names dropped and duplicates collapsed, in
    /// first-seen order.
    pub fn link_many<S: AsRef<str>>(
        &self,
        names: &[S],
        kind: CategorizerKind,
    ) -> Result<Vec<Categorizer>, ShelfError> {
        let names = normalize_names(names);
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let partition = self.db.partition().map(str::to_string);
        self.db.safe_write(|conn| {
            let mut linked = Vec::with_capacity(names.len());
            for name in &names {
                let categorizer = match find_by_name(conn, kind, name)? {
                    Some(mut existing) => {
                        conn.execute(
                            "UPDATE categorizers SET count = count + 1 WHERE id = ?1",
                            rusqlite::params![existing.id.to_string()],
                        )
                        .map_err(sql_err("increment categorizer"))?;
                        existing.count += 1;
                        existing
                    }
                    None => insert_row(conn, kind, name, 1, None, partition.as_deref())?,
                };
                linked.push(categorizer);
            }
            debug!(kind = kind.as_str(), linked = linked.len(), "Linked categorizers");
            Ok(linked)
        })
    }

    /// Decrement each referenced row once.
    ///
    /// A reference with a nil id resolves by name. References to rows that no
    /// longer exist are skipped.
    pub fn unlink_many(
        &self,
        refs: &[Categorizer],
        kind: CategorizerKind,
        mode: UnlinkMode,
    ) -> Result<UnlinkOutcome, ShelfError> {
        if refs.is_empty() {
            return Ok(UnlinkOutcome::default());
        }

        self.db.safe_write(|conn| {
            let mut outcome = UnlinkOutcome::default();
            let mut seen = HashSet::new();
            for reference in refs {
                let row = if reference.id.is_nil() {
                    find_by_name(conn, kind, &reference.name)?
                } else {
                    find_by_id(conn, kind, reference.id)?
                };
                let Some(row) = row else {
                    debug!(kind = kind.as_str(), name = %reference.name, "Unlink skipped missing row");
                    continue;
                };
                if !seen.insert(row.id) {
                    continue;
                }

                let remaining = row.count - 1;
                if remaining <= 0 && mode == UnlinkMode::GarbageCollect {
                    delete_row(conn, row.id)?;
                    outcome.deleted += 1;
                } else {
                    conn.execute(
                        "UPDATE categorizers SET count = ?1 WHERE id = ?2",
                        rusqlite::params![remaining.max(0), row.id.to_string()],
                    )
                    .map_err(sql_err("decrement categorizer"))?;
                }
                outcome.decremented += 1;
            }
            Ok(outcome)
        })
    }

    /// All rows of one kind.
    ///
    /// `sort_by` accepts `name` or `count`; anything else sorts by name.
    pub fn load(
        &self,
        kind: CategorizerKind,
        sort_by: &str,
        order: SortOrder,
    ) -> Result<Vec<Categorizer>, ShelfError> {
        let column = match sort_by {
            "count" => "count",
            _ => "name",
        };
        let sql = format!(
            "SELECT id, name, count, color FROM categorizers
             WHERE kind = ?1
             ORDER BY {} {}, name ASC",
            column,
            order.as_sql()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare categorizer load"))?;
            let rows = stmt
                .query_map(rusqlite::params![kind.as_str()], |row| read_row(row, kind))
                .map_err(sql_err("load categorizers"))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(sql_err("read categorizer"))?);
            }
            Ok(out)
        })
    }

    pub fn find_by_name(
        &self,
        kind: CategorizerKind,
        name: &str,
    ) -> Result<Option<Categorizer>, ShelfError> {
        self.db.with_conn(|conn| find_by_name(conn, kind, name))
    }

    /// Create an empty row, or return the existing row of that name.
    pub fn create(
        &self,
        kind: CategorizerKind,
        name: &str,
        color: Option<&str>,
    ) -> Result<Categorizer, ShelfError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ShelfError::InvalidArgument(
                "categorizer name must not be empty".into(),
            ));
        }
        let partition = self.db.partition().map(str::to_string);
        self.db.safe_write(|conn| match find_by_name(conn, kind, name)? {
            Some(existing) => Ok(existing),
            None => insert_row(conn, kind, name, 0, color, partition.as_deref()),
        })
    }

    /// Delete a row by name, detaching it from every paper.
    ///
    /// Returns false when no such row exists.
    pub fn delete(&self, kind: CategorizerKind, name: &str) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| match find_by_name(conn, kind, name)? {
            Some(row) => {
                delete_row(conn, row.id)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Rename a row in place; counts are unchanged.
    pub fn rename(
        &self,
        kind: CategorizerKind,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, ShelfError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(ShelfError::InvalidArgument(
                "categorizer name must not be empty".into(),
            ));
        }
        self.db.safe_write(|conn| {
            let Some(row) = find_by_name(conn, kind, old_name)? else {
                return Ok(false);
            };
            if row.name == new_name {
                return Ok(true);
            }
            if find_by_name(conn, kind, new_name)?.is_some() {
                return Err(ShelfError::InvalidArgument(format!(
                    "{} '{}' already exists",
                    kind.as_str(),
                    new_name
                )));
            }
            conn.execute(
                "UPDATE categorizers SET name = ?1 WHERE id = ?2",
                rusqlite::params![new_name, row.id.to_string()],
            )
            .map_err(sql_err("rename categorizer"))?;
            Ok(true)
        })
    }

    /// Set the display color of a row; counts are unchanged.
    pub fn colorize(
        &self,
        kind: CategorizerKind,
        name: &str,
        color: &str,
    ) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| {
            let updated = conn
                .execute(
                    "UPDATE categorizers SET color = ?1 WHERE kind = ?2 AND name = ?3",
                    rusqlite::params![color, kind.as_str(), name],
                )
                .map_err(sql_err("colorize categorizer"))?;
            Ok(updated > 0)
        })
    }
}

/// Trim, drop empty names and collapse duplicates, keeping first-seen order.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

pub(crate) fn find_by_name(
    conn: &Connection,
    kind: CategorizerKind,
    name: &str,
) -> Result<Option<Categorizer>, ShelfError> {
    conn.query_row(
        "SELECT id, name, count, color FROM categorizers WHERE kind = ?1 AND name = ?2",
        rusqlite::params![kind.as_str(), name],
        |row| read_row(row, kind),
    )
    .optional()
    .map_err(sql_err("find categorizer"))
}

fn find_by_id(
    conn: &Connection,
    kind: CategorizerKind,
    id: Uuid,
) -> Result<Option<Categorizer>, ShelfError> {
    conn.query_row(
        "SELECT id, name, count, color FROM categorizers WHERE kind = ?1 AND id = ?2",
        rusqlite::params![kind.as_str(), id.to_string()],
        |row| read_row(row, kind),
    )
    .optional()
    .map_err(sql_err("find categorizer"))
}

fn insert_row(
    conn: &Connection,
    kind: CategorizerKind,
    name: &str,
    count: i64,
    color: Option<&str>,
    partition: Option<&str>,
) -> Result<Categorizer, ShelfError> {
    let categorizer = Categorizer {
        id: Uuid::now_v7(),
        kind,
        name: name.to_string(),
        count,
        color: color.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO categorizers (id, partition, kind, name, count, color)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            categorizer.id.to_string(),
            partition,
            kind.as_str(),
            categorizer.name,
            count,
            categorizer.color,
        ],
    )
    .map_err(sql_err("insert categorizer"))?;
    Ok(categorizer)
}

fn delete_row(conn: &Connection, id: Uuid) -> Result<(), ShelfError> {
    conn.execute(
        "DELETE FROM paper_categorizers WHERE categorizer_id = ?1",
        rusqlite::params![id.to_string()],
    )
    .map_err(sql_err("detach categorizer"))?;
    conn.execute(
        "DELETE FROM categorizers WHERE id = ?1",
        rusqlite::params![id.to_string()],
    )
    .map_err(sql_err("delete categorizer"))?;
    Ok(())
}

fn read_row(row: &rusqlite::Row<'_>, kind: CategorizerKind) -> rusqlite::Result<Categorizer> {
    Ok(Categorizer {
        id: row_uuid(row, 0)?,
        kind,
        name: row.get(1)?,
        count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        color: row.get(3)?,
    })
}
