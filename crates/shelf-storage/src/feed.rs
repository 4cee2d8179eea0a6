//! Feed subscriptions and fetched articles.
//!
//! A feed row is ref-counted by the entities that point at it and, like a
//! categorizer, is identified by name when linking. Entities are unique
//! within a feed by `(title, authors)`; merging a fetched entity overwrites
//! the matching row instead of inserting a duplicate.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shelf_core::error::ShelfError;
use shelf_core::types::{Feed, FeedEntity, PubType, SortOrder};

use crate::db::{from_unix, row_uuid, sql_err, Database};

const ENTITY_COLUMNS: &str = "e.id, e.fetch_time, e.title, e.authors, e.abstract, e.publication,
     e.pub_time, e.pub_type, e.doi, e.arxiv, e.main_url, e.pages, e.volume, e.number,
     e.publisher, e.read, f.id, f.name, f.url, f.count, f.color";

/// Filter for loading feed entities.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    /// Restrict to one feed, by name.
    pub feed: Option<String>,
    pub unread_only: bool,
    /// `fetch_time`, `title`, `authors`, `publication` or `pub_time`.
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

pub struct FeedRepository {
    db: Arc<Database>,
}

impl FeedRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // -------------------------------------------------------------------------
    // Feeds
    // -------------------------------------------------------------------------

    pub fn load_feeds(&self, sort_by: &str, order: SortOrder) -> Result<Vec<Feed>, ShelfError> {
        let column = match sort_by {
            "count" => "count",
            _ => "name",
        };
        let sql = format!(
            "SELECT id, name, url, count, color FROM feeds ORDER BY {} {}, name ASC",
            column,
            order.as_sql()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare feed load"))?;
            let rows = stmt
                .query_map([], |row| read_feed(row, 0))
                .map_err(sql_err("load feeds"))?;
            let mut feeds = Vec::new();
            for row in rows {
                feeds.push(row.map_err(sql_err("read feed"))?);
            }
            Ok(feeds)
        })
    }

    pub fn find_feed(&self, name: &str) -> Result<Option<Feed>, ShelfError> {
        self.db.with_conn(|conn| feed_by_name(conn, name))
    }

    /// Add a subscription with no entities. Returns false if the name is
    /// taken.
    pub fn insert_feed(&self, feed: &Feed) -> Result<bool, ShelfError> {
        let partition = self.db.partition().map(str::to_string);
        self.db.safe_write(|conn| {
            if feed_by_name(conn, &feed.name)?.is_some() {
                return Ok(false);
            }
            let mut fresh = feed.clone();
            fresh.count = 0;
            insert_feed_row(conn, &fresh, partition.as_deref())?;
            Ok(true)
        })
    }

    /// Apply one feed transition.
    ///
    /// | existing | desired | effect |
    /// |---|---|---|
    /// | absent | present | link by desired name: increment, or create with count 1 |
    /// | present | present | update name, url, color and count in place |
    /// | present | absent | decrement, deleting the row at zero |
    /// | absent | absent | rejected |
    pub fn apply_feed_change(
        &self,
        existing: Option<&Feed>,
        desired: Option<&Feed>,
    ) -> Result<Option<Feed>, ShelfError> {
        let partition = self.db.partition().map(str::to_string);
        self.db
            .safe_write(|conn| apply_change(conn, existing, desired, partition.as_deref()))
    }

    /// Write each feed: update the row with its id, or link by name.
    pub fn update_feeds(&self, feeds: &[Feed]) -> Vec<bool> {
        feeds
            .iter()
            .map(|feed| {
                let existing = match self.db.with_conn(|conn| feed_by_id(conn, feed.id)) {
                    Ok(existing) => existing,
                    Err(e) => {
                        error!(feed = %feed.name, error = %e, "Feed lookup failed");
                        return false;
                    }
                };
                match self.apply_feed_change(existing.as_ref(), Some(feed)) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(feed = %feed.name, error = %e, "Feed update rejected");
                        false
                    }
                }
            })
            .collect()
    }

    /// Delete feeds by name together with all their entities.
    pub fn delete_feeds<S: AsRef<str>>(&self, names: &[S]) -> Result<usize, ShelfError> {
        self.db.safe_write(|conn| {
            let mut deleted = 0;
            for name in names {
                let Some(feed) = feed_by_name(conn, name.as_ref())? else {
                    continue;
                };
                let entities = conn
                    .execute(
                        "DELETE FROM feed_entities WHERE feed_id = ?1",
                        rusqlite::params![feed.id.to_string()],
                    )
                    .map_err(sql_err("delete feed entities"))?;
                conn.execute(
                    "DELETE FROM feeds WHERE id = ?1",
                    rusqlite::params![feed.id.to_string()],
                )
                .map_err(sql_err("delete feed"))?;
                info!(feed = %feed.name, entities, "Deleted feed");
                deleted += 1;
            }
            Ok(deleted)
        })
    }

    pub fn colorize_feed(&self, name: &str, color: &str) -> Result<bool, ShelfError> {
        self.db.safe_write(|conn| {
            let updated = conn
                .execute(
                    "UPDATE feeds SET color = ?1 WHERE name = ?2",
                    rusqlite::params![color, name],
                )
                .map_err(sql_err("colorize feed"))?;
            Ok(updated > 0)
        })
    }

    // -------------------------------------------------------------------------
    // Entities
    // -------------------------------------------------------------------------

    pub fn load_entities(&self, query: &EntityQuery) -> Result<Vec<FeedEntity>, ShelfError> {
        let column = match query.sort_by.as_deref() {
            Some("title") => "e.title",
            Some("authors") => "e.authors",
            Some("publication") => "e.publication",
            Some("pub_time") | Some("pubTime") => "e.pub_time",
            _ => "e.fetch_time",
        };
        let mut sql = format!(
            "SELECT {} FROM feed_entities e JOIN feeds f ON f.id = e.feed_id WHERE 1",
            ENTITY_COLUMNS
        );
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(feed) = &query.feed {
            sql.push_str(" AND f.name = ?");
            params.push(rusqlite::types::Value::Text(feed.clone()));
        }
        if query.unread_only {
            sql.push_str(" AND COALESCE(e.read, 0) = 0");
        }
        sql.push_str(&format!(
            " ORDER BY {} {}, e.id ASC",
            column,
            query.sort_order.as_sql()
        ));

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare entity load"))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), read_entity)
                .map_err(sql_err("load feed entities"))?;
            let mut entities = Vec::new();
            for row in rows {
                entities.push(row.map_err(sql_err("read feed entity"))?);
            }
            Ok(entities)
        })
    }

    pub fn find_entity(&self, id: Uuid) -> Result<Option<FeedEntity>, ShelfError> {
        self.db.with_conn(|conn| entity_by_id(conn, id))
    }

    /// Merge fetched or edited entities, one write scope per item.
    ///
    /// With `ignore_read_state` the stored read flag of a matched row is kept.
    pub fn update_entities(&self, entities: &[FeedEntity], ignore_read_state: bool) -> Vec<bool> {
        let partition = self.db.partition().map(str::to_string);
        entities
            .iter()
            .map(|entity| {
                let result = self.db.safe_write(|conn| {
                    merge_entity(conn, entity, ignore_read_state, partition.as_deref())
                });
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(title = %entity.title, error = %e, "Feed entity update failed");
                        false
                    }
                }
            })
            .collect()
    }

    /// Delete entities and release their feeds. A feed left with no
    /// entities is deleted.
    pub fn delete_entities(&self, ids: &[Uuid]) -> Result<usize, ShelfError> {
        self.db.safe_write(|conn| {
            let mut deleted = 0;
            for id in ids {
                let Some(entity) = entity_by_id(conn, *id)? else {
                    continue;
                };
                conn.execute(
                    "DELETE FROM feed_entities WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(sql_err("delete feed entity"))?;
                release_feed(conn, entity.feed.id, 1)?;
                deleted += 1;
            }
            Ok(deleted)
        })
    }

    pub fn mark_read(&self, ids: &[Uuid], read: bool) -> Result<usize, ShelfError> {
        self.db.safe_write(|conn| {
            let mut updated = 0;
            for id in ids {
                updated += conn
                    .execute(
                        "UPDATE feed_entities SET read = ?1 WHERE id = ?2",
                        rusqlite::params![read, id.to_string()],
                    )
                    .map_err(sql_err("mark feed entity"))?;
            }
            Ok(updated)
        })
    }
}

fn apply_change(
    conn: &Connection,
    existing: Option<&Feed>,
    desired: Option<&Feed>,
    partition: Option<&str>,
) -> Result<Option<Feed>, ShelfError> {
    match (existing, desired) {
        (None, Some(desired)) => {
            if let Some(mut row) = feed_by_name(conn, &desired.name)? {
                conn.execute(
                    "UPDATE feeds SET count = count + 1 WHERE id = ?1",
                    rusqlite::params![row.id.to_string()],
                )
                .map_err(sql_err("link feed"))?;
                row.count += 1;
                return Ok(Some(row));
            }
            let mut row = desired.clone();
            if feed_by_id(conn, row.id)?.is_some() {
                row.id = Uuid::now_v7();
            }
            row.count = 1;
            insert_feed_row(conn, &row, partition)?;
            debug!(feed = %row.name, "Created feed");
            Ok(Some(row))
        }
        (Some(existing), Some(desired)) => {
            let row = resolve(conn, existing)?
                .ok_or_else(|| ShelfError::NotFound(format!("feed '{}'", existing.name)))?;
            if desired.name != row.name {
                if let Some(other) = feed_by_name(conn, &desired.name)? {
                    if other.id != row.id {
                        return Err(ShelfError::InvalidArgument(format!(
                            "feed '{}' already exists",
                            desired.name
                        )));
                    }
                }
            }
            conn.execute(
                "UPDATE feeds SET name = ?1, url = ?2, color = ?3, count = ?4 WHERE id = ?5",
                rusqlite::params![
                    desired.name,
                    desired.url,
                    desired.color,
                    desired.count,
                    row.id.to_string()
                ],
            )
            .map_err(sql_err("update feed"))?;
            Ok(Some(Feed {
                id: row.id,
                ..desired.clone()
            }))
        }
        (Some(existing), None) => {
            let Some(row) = resolve(conn, existing)? else {
                return Ok(None);
            };
            release_feed(conn, row.id, 1)?;
            Ok(None)
        }
        (None, None) => Err(ShelfError::InvalidArgument(
            "feed change needs an existing or desired feed".into(),
        )),
    }
}

fn merge_entity(
    conn: &Connection,
    entity: &FeedEntity,
    ignore_read_state: bool,
    partition: Option<&str>,
) -> Result<(), ShelfError> {
    // An entity already stored under this id.
    if let Some(stored) = entity_by_id(conn, entity.id)? {
        // Another row in the target feed already holds this article: fold
        // the edit into it and drop the row being moved.
        if let Some(target) = feed_by_name(conn, &entity.feed.name)? {
            if let Some(other) = duplicate_in_feed(conn, target.id, entity, Some(stored.id))? {
                write_fields(conn, other, target.id, entity, ignore_read_state)?;
                conn.execute(
                    "DELETE FROM feed_entities WHERE id = ?1",
                    rusqlite::params![stored.id.to_string()],
                )
                .map_err(sql_err("delete merged feed entity"))?;
                release_feed(conn, stored.feed.id, 1)?;
                debug!(title = %entity.title, feed = %target.name, "Merged into existing feed entity");
                return Ok(());
            }
        }
        if stored.feed.name == entity.feed.name {
            return write_fields(conn, stored.id, stored.feed.id, entity, ignore_read_state);
        }
        // Move the row before releasing the old feed, whose deletion would
        // cascade to it.
        let linked = apply_change(conn, None, Some(&entity.feed), partition)?
            .ok_or_else(|| ShelfError::Storage("feed link returned nothing".into()))?;
        write_fields(conn, stored.id, linked.id, entity, ignore_read_state)?;
        apply_change(conn, Some(&stored.feed), None, partition)?;
        return Ok(());
    }

    // The same article fetched again into the same feed.
    if let Some(feed) = feed_by_name(conn, &entity.feed.name)? {
        if let Some(id) = duplicate_in_feed(conn, feed.id, entity, None)? {
            return write_fields(conn, id, feed.id, entity, ignore_read_state);
        }
    }

    let feed = apply_change(conn, None, Some(&entity.feed), partition)?
        .ok_or_else(|| ShelfError::Storage("feed link returned nothing".into()))?;
    conn.execute(
        "INSERT INTO feed_entities (id, partition, feed_id, fetch_time, title, authors, abstract,
             publication, pub_time, pub_type, doi, arxiv, main_url, pages, volume, number,
             publisher, read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        rusqlite::params![
            entity.id.to_string(),
            partition,
            feed.id.to_string(),
            entity.fetch_time.timestamp(),
            entity.title,
            entity.authors,
            entity.abstract_text,
            entity.publication,
            entity.pub_time,
            entity.pub_type.as_i64(),
            entity.doi,
            entity.arxiv,
            entity.main_url,
            entity.pages,
            entity.volume,
            entity.number,
            entity.publisher,
            entity.read,
        ],
    )
    .map_err(sql_err("insert feed entity"))?;
    Ok(())
}

/// Find a row in `feed_id` with the entity's `(title, authors)`, skipping
/// `except`.
fn duplicate_in_feed(
    conn: &Connection,
    feed_id: Uuid,
    entity: &FeedEntity,
    except: Option<Uuid>,
) -> Result<Option<Uuid>, ShelfError> {
    let except = except.map(|id| id.to_string()).unwrap_or_default();
    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM feed_entities
             WHERE feed_id = ?1 AND title = ?2 AND authors = ?3 AND id <> ?4
             ORDER BY id LIMIT 1",
            rusqlite::params![feed_id.to_string(), entity.title, entity.authors, except],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err("match feed entity"))?;
    duplicate
        .map(|id| {
            Uuid::parse_str(&id)
                .map_err(|e| ShelfError::Storage(format!("Bad feed entity id: {}", e)))
        })
        .transpose()
}

/// Overwrite the mutable fields of a stored entity. The fetch time of the
/// stored row is kept so re-fetching does not extend retention.
fn write_fields(
    conn: &Connection,
    id: Uuid,
    feed_id: Uuid,
    entity: &FeedEntity,
    ignore_read_state: bool,
) -> Result<(), ShelfError> {
    conn.execute(
        "UPDATE feed_entities SET feed_id = ?1, title = ?2, authors = ?3, abstract = ?4,
             publication = ?5, pub_time = ?6, pub_type = ?7, doi = ?8, arxiv = ?9,
             main_url = ?10, pages = ?11, volume = ?12, number = ?13, publisher = ?14
         WHERE id = ?15",
        rusqlite::params![
            feed_id.to_string(),
            entity.title,
            entity.authors,
            entity.abstract_text,
            entity.publication,
            entity.pub_time,
            entity.pub_type.as_i64(),
            entity.doi,
            entity.arxiv,
            entity.main_url,
            entity.pages,
            entity.volume,
            entity.number,
            entity.publisher,
            id.to_string(),
        ],
    )
    .map_err(sql_err("update feed entity"))?;

    if !ignore_read_state {
        conn.execute(
            "UPDATE feed_entities SET read = ?1 WHERE id = ?2",
            rusqlite::params![entity.read, id.to_string()],
        )
        .map_err(sql_err("update read state"))?;
    }
    Ok(())
}

/// Decrement a feed count, never below zero. The row is kept.
fn decrement_feed(conn: &Connection, feed_id: Uuid, by: usize) -> Result<(), ShelfError> {
    conn.execute(
        "UPDATE feeds SET count = MAX(COALESCE(count, 0) - ?1, 0) WHERE id = ?2",
        rusqlite::params![by as i64, feed_id.to_string()],
    )
    .map_err(sql_err("decrement feed"))?;
    Ok(())
}

/// Decrement a feed count and delete the row once it reaches zero.
///
/// Returns true when the feed was deleted.
pub(crate) fn release_feed(conn: &Connection, feed_id: Uuid, by: usize) -> Result<bool, ShelfError> {
    decrement_feed(conn, feed_id, by)?;
    let deleted = conn
        .execute(
            "DELETE FROM feeds WHERE id = ?1 AND COALESCE(count, 0) <= 0",
            rusqlite::params![feed_id.to_string()],
        )
        .map_err(sql_err("release feed"))?;
    if deleted > 0 {
        debug!(feed = %feed_id, "Feed released");
    }
    Ok(deleted > 0)
}

fn resolve(conn: &Connection, feed: &Feed) -> Result<Option<Feed>, ShelfError> {
    match feed_by_id(conn, feed.id)? {
        Some(row) => Ok(Some(row)),
        None => feed_by_name(conn, &feed.name),
    }
}

fn insert_feed_row(conn: &Connection, feed: &Feed, partition: Option<&str>) -> Result<(), ShelfError> {
    conn.execute(
        "INSERT INTO feeds (id, partition, name, url, count, color) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            feed.id.to_string(),
            partition,
            feed.name,
            feed.url,
            feed.count,
            feed.color
        ],
    )
    .map_err(sql_err("insert feed"))?;
    Ok(())
}

fn feed_by_name(conn: &Connection, name: &str) -> Result<Option<Feed>, ShelfError> {
    conn.query_row(
        "SELECT id, name, url, count, color FROM feeds WHERE name = ?1",
        rusqlite::params![name],
        |row| read_feed(row, 0),
    )
    .optional()
    .map_err(sql_err("find feed"))
}

fn feed_by_id(conn: &Connection, id: Uuid) -> Result<Option<Feed>, ShelfError> {
    conn.query_row(
        "SELECT id, name, url, count, color FROM feeds WHERE id = ?1",
        rusqlite::params![id.to_string()],
        |row| read_feed(row, 0),
    )
    .optional()
    .map_err(sql_err("find feed"))
}

fn entity_by_id(conn: &Connection, id: Uuid) -> Result<Option<FeedEntity>, ShelfError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM feed_entities e JOIN feeds f ON f.id = e.feed_id WHERE e.id = ?1",
            ENTITY_COLUMNS
        ),
        rusqlite::params![id.to_string()],
        read_entity,
    )
    .optional()
    .map_err(sql_err("find feed entity"))
}

fn read_feed(row: &Row<'_>, offset: usize) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row_uuid(row, offset)?,
        name: row.get(offset + 1)?,
        url: row.get::<_, Option<String>>(offset + 2)?.unwrap_or_default(),
        count: row.get::<_, Option<i64>>(offset + 3)?.unwrap_or(0),
        color: row.get(offset + 4)?,
    })
}

fn read_entity(row: &Row<'_>) -> rusqlite::Result<FeedEntity> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    Ok(FeedEntity {
        id: row_uuid(row, 0)?,
        fetch_time: from_unix(row.get::<_, Option<i64>>(1)?.unwrap_or(0)),
        title: text(2)?,
        authors: text(3)?,
        abstract_text: text(4)?,
        publication: text(5)?,
        pub_time: text(6)?,
        pub_type: PubType::from_i64(row.get::<_, Option<i64>>(7)?.unwrap_or(2)),
        doi: text(8)?,
        arxiv: text(9)?,
        main_url: text(10)?,
        pages: text(11)?,
        volume: text(12)?,
        number: text(13)?,
        publisher: text(14)?,
        read: row.get::<_, Option<bool>>(15)?.unwrap_or(false),
        feed: read_feed(row, 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::StoreSchema;

    fn repo() -> FeedRepository {
        FeedRepository::new(Arc::new(Database::in_memory(StoreSchema::Library).unwrap()))
    }

    fn arxiv() -> Feed {
        Feed::new("arXiv cs.CL", "https://arxiv.org/rss/cs.CL")
    }

    fn feed_count(repo: &FeedRepository, name: &str) -> Option<i64> {
        repo.find_feed(name).unwrap().map(|f| f.count)
    }

    #[test]
    fn test_link_creates_then_increments() {
        let repo = repo();
        let created = repo.apply_feed_change(None, Some(&arxiv())).unwrap().unwrap();
        assert_eq!(created.count, 1);
        let linked = repo.apply_feed_change(None, Some(&arxiv())).unwrap().unwrap();
        assert_eq!(linked.id, created.id);
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(2));
    }

    #[test]
    fn test_update_in_place() {
        let repo = repo();
        let created = repo.apply_feed_change(None, Some(&arxiv())).unwrap().unwrap();
        let mut desired = created.clone();
        desired.name = "arXiv NLP".into();
        desired.color = Some("green".into());

        let updated = repo
            .apply_feed_change(Some(&created), Some(&desired))
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert!(repo.find_feed("arXiv cs.CL").unwrap().is_none());
        let row = repo.find_feed("arXiv NLP").unwrap().unwrap();
        assert_eq!(row.color.as_deref(), Some("green"));
        assert_eq!(row.count, 1);
    }

    #[test]
    fn test_unlink_deletes_at_zero() {
        let repo = repo();
        let feed = repo.apply_feed_change(None, Some(&arxiv())).unwrap().unwrap();
        repo.apply_feed_change(None, Some(&arxiv())).unwrap();
        assert!(repo.apply_feed_change(Some(&feed), None).unwrap().is_none());
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(1));
        repo.apply_feed_change(Some(&feed), None).unwrap();
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), None);
    }

    #[test]
    fn test_absent_absent_is_rejected() {
        let err = repo().apply_feed_change(None, None).unwrap_err();
        assert!(matches!(err, ShelfError::InvalidArgument(_)));
    }

    #[test]
    fn test_entity_merge_dedups_within_feed() {
        let repo = repo();
        let first = FeedEntity::new(arxiv(), "Attention", "A, B");
        let mut again = FeedEntity::new(arxiv(), "Attention", "A, B");
        again.abstract_text = "updated abstract".into();

        assert_eq!(repo.update_entities(&[first.clone()], false), vec![true]);
        assert_eq!(repo.update_entities(&[again], false), vec![true]);

        let entities = repo.load_entities(&EntityQuery::default()).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, first.id);
        assert_eq!(entities[0].abstract_text, "updated abstract");
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(1));
    }

    #[test]
    fn test_ignore_read_state_keeps_flag() {
        let repo = repo();
        let entity = FeedEntity::new(arxiv(), "Paper", "X");
        repo.update_entities(&[entity.clone()], false);
        repo.mark_read(&[entity.id], true).unwrap();

        let refetched = FeedEntity::new(arxiv(), "Paper", "X");
        repo.update_entities(&[refetched.clone()], true);
        assert!(repo.find_entity(entity.id).unwrap().unwrap().read);

        repo.update_entities(&[refetched], false);
        assert!(!repo.find_entity(entity.id).unwrap().unwrap().read);
    }

    #[test]
    fn test_changing_feed_relinks() {
        let repo = repo();
        let mut entity = FeedEntity::new(arxiv(), "Paper", "X");
        repo.update_entities(&[entity.clone()], false);

        entity.feed = Feed::new("Other", "https://example.org/rss");
        repo.update_entities(&[entity.clone()], false);

        assert_eq!(feed_count(&repo, "arXiv cs.CL"), None);
        assert_eq!(feed_count(&repo, "Other"), Some(1));
        assert_eq!(repo.find_entity(entity.id).unwrap().unwrap().feed.name, "Other");
    }

    #[test]
    fn test_load_entities_filters() {
        let repo = repo();
        let a = FeedEntity::new(arxiv(), "A", "X");
        let b = FeedEntity::new(Feed::new("Other", ""), "B", "Y");
        repo.update_entities(&[a.clone(), b], false);
        repo.mark_read(&[a.id], true).unwrap();

        let only_arxiv = repo
            .load_entities(&EntityQuery {
                feed: Some("arXiv cs.CL".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_arxiv.len(), 1);

        let unread = repo
            .load_entities(&EntityQuery {
                unread_only: true,
                sort_by: Some("title".into()),
                sort_order: SortOrder::Asc,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "B");
    }

    #[test]
    fn test_delete_entities_releases_empty_feed() {
        let repo = repo();
        let a = FeedEntity::new(arxiv(), "A", "X");
        let b = FeedEntity::new(arxiv(), "B", "Y");
        repo.update_entities(&[a.clone(), b.clone()], false);

        assert_eq!(repo.delete_entities(&[a.id]).unwrap(), 1);
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(1));
        assert_eq!(repo.delete_entities(&[b.id]).unwrap(), 1);
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), None);
    }

    #[test]
    fn test_moving_onto_existing_article_merges() {
        let repo = repo();
        let other = Feed::new("Other", "https://example.org/rss");
        let mut moved = FeedEntity::new(arxiv(), "Same", "X");
        let resident = FeedEntity::new(other.clone(), "Same", "X");
        repo.update_entities(&[moved.clone(), resident.clone()], false);

        moved.feed = other;
        moved.abstract_text = "from the moved copy".into();
        assert_eq!(repo.update_entities(&[moved.clone()], false), vec![true]);

        let entities = repo
            .load_entities(&EntityQuery {
                feed: Some("Other".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, resident.id);
        assert_eq!(entities[0].abstract_text, "from the moved copy");
        assert!(repo.find_entity(moved.id).unwrap().is_none());
        assert_eq!(feed_count(&repo, "Other"), Some(1));
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), None);
    }

    #[test]
    fn test_retitling_onto_sibling_merges() {
        let repo = repo();
        let keep = FeedEntity::new(arxiv(), "Final", "X");
        let mut draft = FeedEntity::new(arxiv(), "Draft", "X");
        repo.update_entities(&[keep.clone(), draft.clone()], false);

        draft.title = "Final".into();
        repo.update_entities(&[draft], false);

        let entities = repo.load_entities(&EntityQuery::default()).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, keep.id);
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(1));
    }

    #[test]
    fn test_delete_feed_cascades() {
        let repo = repo();
        repo.update_entities(
            &[
                FeedEntity::new(arxiv(), "A", "X"),
                FeedEntity::new(arxiv(), "B", "Y"),
            ],
            false,
        );
        assert_eq!(repo.delete_feeds(&["arXiv cs.CL"]).unwrap(), 1);
        assert!(repo.load_entities(&EntityQuery::default()).unwrap().is_empty());
        assert!(repo.load_feeds("name", SortOrder::Asc).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_colorize_feed() {
        let repo = repo();
        assert!(repo.insert_feed(&arxiv()).unwrap());
        assert!(!repo.insert_feed(&arxiv()).unwrap());
        assert_eq!(feed_count(&repo, "arXiv cs.CL"), Some(0));
        assert!(repo.colorize_feed("arXiv cs.CL", "red").unwrap());
        assert_eq!(
            repo.find_feed("arXiv cs.CL").unwrap().unwrap().color.as_deref(),
            Some("red")
        );
    }
}
