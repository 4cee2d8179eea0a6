//! Store schema migrations.
//!
//! Opening a store first brings the table layout to its newest shape (missing
//! tables and columns are created, nullable) and then applies every data gate
//! whose version is above the version recorded in `schema_migrations`, in
//! ascending order. Each gate runs in its own transaction together with the
//! row that records it, so a re-open never applies a gate twice.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use shelf_core::error::ShelfError;

/// Newest library schema version known to this build.
pub const LATEST_VERSION: i64 = 5;

/// Newest cache schema version known to this build.
pub const LATEST_CACHE_VERSION: i64 = 1;

/// Namespace for ids derived from legacy string keys.
const LEGACY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3e2a_9c4d_4f0b_8a61_2d5e_7c90_b3a4);

/// Which layout a store file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSchema {
    /// Papers, categorizers, feeds and smart filters.
    Library,
    /// Full-text and thumbnail cache.
    Cache,
}

struct Gate {
    version: i64,
    name: &'static str,
    apply: fn(&Connection) -> Result<(), ShelfError>,
}

const LIBRARY_GATES: &[Gate] = &[
    Gate {
        version: 1,
        name: "base_layout",
        apply: apply_v1,
    },
    Gate {
        version: 2,
        name: "fill_defaults",
        apply: apply_v2,
    },
    Gate {
        version: 3,
        name: "file_base_names",
        apply: apply_v3,
    },
    Gate {
        version: 4,
        name: "typed_ids",
        apply: apply_v4,
    },
    Gate {
        version: 5,
        name: "empty_list_fields",
        apply: apply_v5,
    },
];

const CACHE_GATES: &[Gate] = &[Gate {
    version: 1,
    name: "cache_layout",
    apply: apply_v1,
}];

/// Columns of the newest library layout, per table.
///
/// Columns absent from an older store are added before any gate runs.
const LIBRARY_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "papers",
        &[
            ("partition", "TEXT"),
            ("add_time", "INTEGER"),
            ("title", "TEXT"),
            ("authors", "TEXT"),
            ("publication", "TEXT"),
            ("pub_time", "TEXT"),
            ("pub_type", "INTEGER"),
            ("doi", "TEXT"),
            ("arxiv", "TEXT"),
            ("pages", "TEXT"),
            ("volume", "TEXT"),
            ("number", "TEXT"),
            ("publisher", "TEXT"),
            ("main_url", "TEXT"),
            ("supp_urls", "TEXT"),
            ("flag", "INTEGER"),
            ("rating", "INTEGER"),
            ("note", "TEXT"),
            ("codes", "TEXT"),
        ],
    ),
    (
        "categorizers",
        &[
            ("partition", "TEXT"),
            ("count", "INTEGER"),
            ("color", "TEXT"),
        ],
    ),
    (
        "feeds",
        &[
            ("partition", "TEXT"),
            ("url", "TEXT"),
            ("count", "INTEGER"),
            ("color", "TEXT"),
        ],
    ),
    (
        "feed_entities",
        &[
            ("partition", "TEXT"),
            ("fetch_time", "INTEGER"),
            ("title", "TEXT"),
            ("authors", "TEXT"),
            ("abstract", "TEXT"),
            ("publication", "TEXT"),
            ("pub_time", "TEXT"),
            ("pub_type", "INTEGER"),
            ("doi", "TEXT"),
            ("arxiv", "TEXT"),
            ("main_url", "TEXT"),
            ("pages", "TEXT"),
            ("volume", "TEXT"),
            ("number", "TEXT"),
            ("publisher", "TEXT"),
            ("read", "INTEGER"),
        ],
    ),
    (
        "smart_filters",
        &[
            ("partition", "TEXT"),
            ("filter", "TEXT"),
            ("color", "TEXT"),
            ("count", "INTEGER"),
        ],
    ),
];

/// Bring a store to its newest schema version.
///
/// Returns the number of gates applied.
pub fn run_migrations(conn: &Connection, schema: StoreSchema) -> Result<usize, ShelfError> {
    let latest = match schema {
        StoreSchema::Library => LATEST_VERSION,
        StoreSchema::Cache => LATEST_CACHE_VERSION,
    };
    migrate_to(conn, schema, latest)
}

/// Apply gates up to and including `target`.
///
/// Exposed separately so a store can be walked forward one version per open.
pub fn migrate_to(conn: &Connection, schema: StoreSchema, target: i64) -> Result<usize, ShelfError> {
    ensure_tracking_table(conn)?;

    let (latest, gates) = match schema {
        StoreSchema::Library => (LATEST_VERSION, LIBRARY_GATES),
        StoreSchema::Cache => (LATEST_CACHE_VERSION, CACHE_GATES),
    };

    let current = current_version(conn)?;
    if current > latest {
        return Err(ShelfError::IncompatibleSchema {
            found: current,
            supported: latest,
        });
    }

    match schema {
        StoreSchema::Library => ensure_library_layout(conn)?,
        StoreSchema::Cache => ensure_cache_layout(conn)?,
    }

    let mut applied = 0;
    for gate in gates
        .iter()
        .filter(|g| g.version > current && g.version <= target)
    {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| storage_err("begin migration", e))?;
        (gate.apply)(&tx)?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![gate.version, gate.name],
        )
        .map_err(|e| storage_err("record migration", e))?;
        tx.commit().map_err(|e| storage_err("commit migration", e))?;

        info!("Applied migration v{}: {}", gate.version, gate.name);
        applied += 1;
    }

    Ok(applied)
}

/// Version recorded in the store file, 0 for a fresh store.
pub fn current_version(conn: &Connection) -> Result<i64, ShelfError> {
    ensure_tracking_table(conn)?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| storage_err("query migration version", e))
}

fn ensure_tracking_table(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| storage_err("create migrations table", e))
}

fn ensure_library_layout(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS papers (
            id          TEXT PRIMARY KEY NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categorizers (
            id          TEXT PRIMARY KEY NOT NULL,
            kind        TEXT NOT NULL CHECK (kind IN ('tag', 'folder')),
            name        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS paper_categorizers (
            paper_id        TEXT NOT NULL,
            categorizer_id  TEXT NOT NULL,
            position        INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (paper_id, categorizer_id),
            FOREIGN KEY (paper_id) REFERENCES papers(id)
                ON DELETE CASCADE ON UPDATE CASCADE,
            FOREIGN KEY (categorizer_id) REFERENCES categorizers(id)
                ON DELETE CASCADE ON UPDATE CASCADE
        );

        CREATE TABLE IF NOT EXISTS feeds (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feed_entities (
            id          TEXT PRIMARY KEY NOT NULL,
            feed_id     TEXT NOT NULL,
            FOREIGN KEY (feed_id) REFERENCES feeds(id)
                ON DELETE CASCADE ON UPDATE CASCADE
        );

        CREATE TABLE IF NOT EXISTS smart_filters (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| storage_err("create library tables", e))?;

    for (table, columns) in LIBRARY_COLUMNS {
        let existing = table_columns(conn, table)?;
        for (column, ty) in columns.iter() {
            if !existing.iter().any(|c| c == column) {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    table, column, ty
                ))
                .map_err(|e| storage_err("add column", e))?;
            }
        }
    }

    // The unique (kind, name) index is the name index used for link
    // resolution.
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_categorizers_kind_name
            ON categorizers (kind, name);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_feeds_name
            ON feeds (name);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_smart_filters_name
            ON smart_filters (name);

        CREATE INDEX IF NOT EXISTS idx_papers_title_authors
            ON papers (title, authors);

        CREATE INDEX IF NOT EXISTS idx_papers_add_time
            ON papers (add_time DESC);

        CREATE INDEX IF NOT EXISTS idx_paper_categorizers_categorizer
            ON paper_categorizers (categorizer_id);

        CREATE INDEX IF NOT EXISTS idx_feed_entities_feed
            ON feed_entities (feed_id, title, authors);

        CREATE INDEX IF NOT EXISTS idx_feed_entities_fetch_time
            ON feed_entities (read, fetch_time);
        ",
    )
    .map_err(|e| storage_err("create library indexes", e))
}

fn ensure_cache_layout(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS fulltext_cache (
            paper_id        TEXT PRIMARY KEY NOT NULL,
            text            TEXT NOT NULL DEFAULT '',
            content_hash    TEXT NOT NULL DEFAULT '',
            indexed         INTEGER NOT NULL DEFAULT 0,
            thumbnail       BLOB,
            thumb_width     INTEGER,
            thumb_height    INTEGER,
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| storage_err("create cache tables", e))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, ShelfError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| storage_err("inspect table", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| storage_err("inspect table", e))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.map_err(|e| storage_err("inspect table", e))?);
    }
    Ok(columns)
}

/// Version 1: base layout. Tables and indexes are created by the layout
/// pass, so the gate only records the version.
fn apply_v1(_conn: &Connection) -> Result<(), ShelfError> {
    Ok(())
}

/// Version 2: default-fill fields introduced after the base layout.
fn apply_v2(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "
        UPDATE papers SET
            add_time    = COALESCE(add_time, 0),
            title       = COALESCE(title, ''),
            authors     = COALESCE(authors, ''),
            publication = COALESCE(publication, ''),
            pub_time    = COALESCE(pub_time, ''),
            pub_type    = COALESCE(pub_type, 2),
            doi         = COALESCE(doi, ''),
            arxiv       = COALESCE(arxiv, ''),
            pages       = COALESCE(pages, ''),
            volume      = COALESCE(volume, ''),
            number      = COALESCE(number, ''),
            publisher   = COALESCE(publisher, ''),
            main_url    = COALESCE(main_url, ''),
            flag        = COALESCE(flag, 0),
            rating      = COALESCE(rating, 0),
            note        = COALESCE(note, '');

        UPDATE categorizers SET count = COALESCE(count, 0);

        UPDATE feeds SET
            url   = COALESCE(url, ''),
            count = COALESCE(count, 0);

        UPDATE feed_entities SET
            fetch_time  = COALESCE(fetch_time, 0),
            title       = COALESCE(title, ''),
            authors     = COALESCE(authors, ''),
            abstract    = COALESCE(abstract, ''),
            publication = COALESCE(publication, ''),
            pub_time    = COALESCE(pub_time, ''),
            pub_type    = COALESCE(pub_type, 2),
            doi         = COALESCE(doi, ''),
            arxiv       = COALESCE(arxiv, ''),
            main_url    = COALESCE(main_url, ''),
            pages       = COALESCE(pages, ''),
            volume      = COALESCE(volume, ''),
            number      = COALESCE(number, ''),
            publisher   = COALESCE(publisher, ''),
            read        = COALESCE(read, 0);

        UPDATE smart_filters SET
            filter = COALESCE(filter, ''),
            count  = COALESCE(count, 0);
        ",
    )
    .map_err(|e| storage_err("apply migration v2", e))
}

/// Version 3: file references become base names relative to the library
/// directory.
fn apply_v3(conn: &Connection) -> Result<(), ShelfError> {
    let rows: Vec<(String, Option<String>, Option<String>)> = {
        let mut stmt = conn
            .prepare("SELECT id, main_url, supp_urls FROM papers")
            .map_err(|e| storage_err("apply migration v3", e))?;
        let mapped = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| storage_err("apply migration v3", e))?;
        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row.map_err(|e| storage_err("apply migration v3", e))?);
        }
        rows
    };

    for (id, main_url, supp_urls) in rows {
        let main = main_url.as_deref().map(base_name);
        let supp = match supp_urls.as_deref() {
            Some(raw) => {
                let urls: Vec<String> = serde_json::from_str(raw)?;
                let names: Vec<String> = urls.iter().map(|u| base_name(u)).collect();
                Some(serde_json::to_string(&names)?)
            }
            None => None,
        };
        conn.execute(
            "UPDATE papers SET main_url = ?1, supp_urls = ?2 WHERE id = ?3",
            rusqlite::params![main, supp, id],
        )
        .map_err(|e| storage_err("apply migration v3", e))?;
    }
    Ok(())
}

/// Version 4: legacy string keys become UUIDs.
///
/// Keys that already parse as UUIDs are kept; others map to a v5 UUID of the
/// legacy key so every open derives the same id. Link tables follow through
/// `ON UPDATE CASCADE`, and foreign-key checks are deferred to commit for
/// older files whose link tables predate the cascade clauses.
fn apply_v4(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch("PRAGMA defer_foreign_keys = ON;")
        .map_err(|e| storage_err("apply migration v4", e))?;

    for table in ["papers", "categorizers", "feeds", "feed_entities", "smart_filters"] {
        let legacy = legacy_ids(conn, &format!("SELECT id FROM {}", table))?;
        for old in legacy {
            let new = typed_id(&old).to_string();
            conn.execute(
                &format!("UPDATE {} SET id = ?1 WHERE id = ?2", table),
                rusqlite::params![new, old],
            )
            .map_err(|e| storage_err("apply migration v4", e))?;

            // Explicit rewrite for references the cascade may not cover.
            match table {
                "papers" => {
                    conn.execute(
                        "UPDATE paper_categorizers SET paper_id = ?1 WHERE paper_id = ?2",
                        rusqlite::params![new, old],
                    )
                    .map_err(|e| storage_err("apply migration v4", e))?;
                }
                "categorizers" => {
                    conn.execute(
                        "UPDATE paper_categorizers SET categorizer_id = ?1 WHERE categorizer_id = ?2",
                        rusqlite::params![new, old],
                    )
                    .map_err(|e| storage_err("apply migration v4", e))?;
                }
                "feeds" => {
                    conn.execute(
                        "UPDATE feed_entities SET feed_id = ?1 WHERE feed_id = ?2",
                        rusqlite::params![new, old],
                    )
                    .map_err(|e| storage_err("apply migration v4", e))?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Version 5: list fields added later start out empty.
fn apply_v5(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "UPDATE papers SET codes = '[]' WHERE codes IS NULL;
         UPDATE papers SET supp_urls = '[]' WHERE supp_urls IS NULL;",
    )
    .map_err(|e| storage_err("apply migration v5", e))
}

fn legacy_ids(conn: &Connection, sql: &str) -> Result<Vec<String>, ShelfError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| storage_err("scan ids", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| storage_err("scan ids", e))?;
    let mut ids = Vec::new();
    for row in rows {
        let id = row.map_err(|e| storage_err("scan ids", e))?;
        if Uuid::parse_str(&id).is_err() {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Typed id for a stored key.
pub fn typed_id(key: &str) -> Uuid {
    Uuid::parse_str(key).unwrap_or_else(|_| Uuid::new_v5(&LEGACY_ID_NAMESPACE, key.as_bytes()))
}

fn base_name(path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let trimmed = path.trim_end_matches(['/', '\\']);
    let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if name.is_empty() {
        return String::new();
    }
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Whether a table exists in the store.
pub fn has_table(conn: &Connection, table: &str) -> Result<bool, ShelfError> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![table],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|r| r.is_some())
    .map_err(|e| storage_err("inspect schema", e))
}

fn storage_err(context: &str, e: rusqlite::Error) -> ShelfError {
    ShelfError::Storage(format!("Failed to {}: {}", context, e))
}
