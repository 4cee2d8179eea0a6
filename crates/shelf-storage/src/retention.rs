//! Feed entity retention.
//!
//! Read entities expire sooner than unread ones. A purge deletes every
//! entity strictly older than its window and releases the owning feeds.
//! A feed left with no entities is deleted.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use shelf_core::config::FeedConfig;
use shelf_core::error::ShelfError;

use crate::db::{row_uuid, sql_err, Database};
use crate::feed::release_feed;

/// Result of a purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionResult {
    /// Deleted entities per feed name.
    pub per_feed: HashMap<String, usize>,
    pub read_deleted: usize,
    pub unread_deleted: usize,
}

impl RetentionResult {
    pub fn total(&self) -> usize {
        self.read_deleted + self.unread_deleted
    }
}

/// Age-based cleanup of feed entities.
pub struct FeedRetention;

impl FeedRetention {
    /// Cut-off timestamps `(read, unread)` for a purge at `now`.
    pub fn boundaries(config: &FeedConfig, now: DateTime<Utc>) -> (i64, i64) {
        let read = now - Duration::days(i64::from(config.read_retention_days));
        let unread = now - Duration::days(i64::from(config.unread_retention_days));
        (read.timestamp(), unread.timestamp())
    }

    /// Delete expired entities in one write scope.
    ///
    /// Feed counts are reduced by the per-feed deletions. Feeds reaching zero
    /// are deleted.
    pub fn run_purge(
        db: &Database,
        config: &FeedConfig,
        now: DateTime<Utc>,
    ) -> Result<RetentionResult, ShelfError> {
        let (read_boundary, unread_boundary) = Self::boundaries(config, now);

        let result = db.safe_write(|conn| {
            let expired: Vec<(Uuid, String, bool)> = {
                let mut stmt = conn
                    .prepare(
                        "SELECT f.id, f.name, COALESCE(e.read, 0)
                         FROM feed_entities e JOIN feeds f ON f.id = e.feed_id
                         WHERE (COALESCE(e.read, 0) = 1 AND COALESCE(e.fetch_time, 0) < ?1)
                            OR (COALESCE(e.read, 0) = 0 AND COALESCE(e.fetch_time, 0) < ?2)",
                    )
                    .map_err(sql_err("prepare retention scan"))?;
                let rows = stmt
                    .query_map(rusqlite::params![read_boundary, unread_boundary], |row| {
                        Ok((row_uuid(row, 0)?, row.get(1)?, row.get(2)?))
                    })
                    .map_err(sql_err("scan expired entities"))?;
                let mut expired = Vec::new();
                for row in rows {
                    expired.push(row.map_err(sql_err("read expired entity"))?);
                }
                expired
            };

            let read_deleted = conn
                .execute(
                    "DELETE FROM feed_entities WHERE COALESCE(read, 0) = 1 AND COALESCE(fetch_time, 0) < ?1",
                    rusqlite::params![read_boundary],
                )
                .map_err(sql_err("purge read entities"))?;
            let unread_deleted = conn
                .execute(
                    "DELETE FROM feed_entities WHERE COALESCE(read, 0) = 0 AND COALESCE(fetch_time, 0) < ?1",
                    rusqlite::params![unread_boundary],
                )
                .map_err(sql_err("purge unread entities"))?;

            let mut by_feed: HashMap<Uuid, (String, usize)> = HashMap::new();
            for (feed_id, name, _) in &expired {
                by_feed.entry(*feed_id).or_insert_with(|| (name.clone(), 0)).1 += 1;
            }
            for (feed_id, (_, count)) in &by_feed {
                release_feed(conn, *feed_id, *count)?;
            }

            Ok(RetentionResult {
                per_feed: by_feed.into_values().collect(),
                read_deleted,
                unread_deleted,
            })
        })?;

        if result.total() > 0 {
            info!(
                read = result.read_deleted,
                unread = result.unread_deleted,
                feeds = result.per_feed.len(),
                "Feed retention purge complete"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use shelf_core::types::{Feed, FeedEntity};

    use crate::feed::FeedRepository;
    use crate::migrations::StoreSchema;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn entity(feed: &Feed, title: &str, age: Duration, read: bool) -> FeedEntity {
        let mut e = FeedEntity::new(feed.clone(), title, "X");
        e.fetch_time = now() - age;
        e.read = read;
        e
    }

    fn setup() -> (Arc<Database>, FeedRepository, Feed) {
        let db = Arc::new(Database::in_memory(StoreSchema::Library).unwrap());
        let repo = FeedRepository::new(db.clone());
        let feed = Feed::new("arXiv", "https://arxiv.org/rss");
        (db, repo, feed)
    }

    #[test]
    fn test_read_boundary_is_strict() {
        let (db, repo, feed) = setup();
        let three_days = Duration::days(3);
        repo.update_entities(
            &[
                entity(&feed, "expired", three_days + Duration::seconds(1), true),
                entity(&feed, "kept", three_days - Duration::seconds(1), true),
            ],
            false,
        );
        assert_eq!(repo.find_feed("arXiv").unwrap().unwrap().count, 2);

        let result = FeedRetention::run_purge(&db, &FeedConfig::default(), now()).unwrap();
        assert_eq!(result.read_deleted, 1);
        assert_eq!(result.per_feed.get("arXiv"), Some(&1));

        let left = repo.load_entities(&Default::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "kept");
        assert_eq!(repo.find_feed("arXiv").unwrap().unwrap().count, 1);
    }

    #[test]
    fn test_exact_boundary_is_retained() {
        let (db, repo, feed) = setup();
        repo.update_entities(&[entity(&feed, "edge", Duration::days(3), true)], false);
        let result = FeedRetention::run_purge(&db, &FeedConfig::default(), now()).unwrap();
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn test_unread_window_is_longer() {
        let (db, repo, feed) = setup();
        repo.update_entities(
            &[
                entity(&feed, "unread-recent", Duration::days(10), false),
                entity(&feed, "unread-old", Duration::days(31), false),
                entity(&feed, "read-old", Duration::days(10), true),
            ],
            false,
        );

        let result = FeedRetention::run_purge(&db, &FeedConfig::default(), now()).unwrap();
        assert_eq!(result.unread_deleted, 1);
        assert_eq!(result.read_deleted, 1);
        assert_eq!(result.per_feed.get("arXiv"), Some(&2));
        assert_eq!(repo.find_feed("arXiv").unwrap().unwrap().count, 1);
    }

    #[test]
    fn test_purge_deletes_emptied_feed() {
        let (db, repo, feed) = setup();
        let other = Feed::new("Other", "");
        repo.update_entities(
            &[
                entity(&feed, "old", Duration::days(40), false),
                entity(&other, "old elsewhere", Duration::days(40), false),
                entity(&other, "fresh", Duration::days(1), false),
            ],
            false,
        );
        let result = FeedRetention::run_purge(&db, &FeedConfig::default(), now()).unwrap();
        assert_eq!(result.unread_deleted, 2);
        assert!(repo.find_feed("arXiv").unwrap().is_none());
        assert_eq!(repo.find_feed("Other").unwrap().unwrap().count, 1);
    }

    #[test]
    fn test_custom_windows() {
        let (db, repo, feed) = setup();
        repo.update_entities(&[entity(&feed, "a", Duration::days(2), true)], false);
        let config = FeedConfig {
            read_retention_days: 1,
            unread_retention_days: 30,
        };
        let result = FeedRetention::run_purge(&db, &config, now()).unwrap();
        assert_eq!(result.read_deleted, 1);
    }
}
