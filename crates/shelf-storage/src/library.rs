//! The library facade consumed by the UI layer.
//!
//! Every operation opens the session lazily, runs against the current store
//! handle and publishes a [`ChangeBatch`] for the collections it touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use shelf_core::config::ShelfConfig;
use shelf_core::error::ShelfError;
use shelf_core::events::{ChangeBatch, CollectionKind};
use shelf_core::types::{
    Categorizer, CategorizerKind, Feed, FeedEntity, Paper, SearchMode, SearchParams, SmartFilter,
    SortOrder, Thumbnail,
};
use shelf_extract::{ContentHasher, TextExtractor};

use crate::categorizer::CategorizerLinker;
use crate::db::sql_err;
use crate::feed::{EntityQuery, FeedRepository};
use crate::fulltext::FullTextCache;
use crate::query;
use crate::repository::{PaperRepository, WriteStatus};
use crate::retention::{FeedRetention, RetentionResult};
use crate::session::{Session, StoreHandle};
use crate::smart_filter::SmartFilterRepository;

/// Row counts across the library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub papers: i64,
    pub tags: i64,
    pub folders: i64,
    pub feeds: i64,
    pub feed_entities: i64,
    pub unread_feed_entities: i64,
    pub smart_filters: i64,
    pub indexed_papers: i64,
}

/// Components bound to one store handle.
struct Stores {
    handle: StoreHandle,
    papers: PaperRepository,
    feeds: FeedRepository,
    filters: SmartFilterRepository,
    fulltext: FullTextCache,
}

impl Stores {
    fn categorizers(&self) -> &CategorizerLinker {
        self.papers.linker()
    }
}

pub struct Library {
    session: Arc<Session>,
    extractor: Arc<dyn TextExtractor>,
    hasher: Arc<dyn ContentHasher>,
}

impl Library {
    pub fn new(
        session: Arc<Session>,
        extractor: Arc<dyn TextExtractor>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            session,
            extractor,
            hasher,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn config(&self) -> &ShelfConfig {
        self.session.config()
    }

    async fn stores(&self) -> Result<Stores, ShelfError> {
        let handle = self.session.open(false).await?;
        Ok(Stores {
            papers: PaperRepository::new(handle.library.clone()),
            feeds: FeedRepository::new(handle.library.clone()),
            filters: SmartFilterRepository::new(handle.library.clone()),
            fulltext: FullTextCache::new(
                handle.cache.clone(),
                self.extractor.clone(),
                self.hasher.clone(),
                self.session.library_dir().to_path_buf(),
            ),
            handle,
        })
    }

    /// Re-open the stores. With `force` the current handle and all listeners
    /// are dropped first.
    pub async fn reinit(&self, force: bool) -> Result<(), ShelfError> {
        self.session.open(force).await?;
        Ok(())
    }

    pub fn subscribe(&self, kind: CollectionKind) -> broadcast::Receiver<ChangeBatch> {
        self.session.subscribe(kind)
    }

    // -------------------------------------------------------------------------
    // Papers
    // -------------------------------------------------------------------------

    /// Papers matching the search parameters.
    ///
    /// Full-text mode narrows the structurally filtered papers by their
    /// extracted text.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<Paper>, ShelfError> {
        let stores = self.stores().await?;
        let filter = query::compile(params);
        let sort_by = params
            .sort_by
            .clone()
            .unwrap_or_else(|| self.config().search.sort_by.clone());
        let order = params
            .sort_order
            .unwrap_or(self.config().search.sort_order);

        let papers = stores.papers.load(&filter, &sort_by, order)?;
        let text = params.search.as_deref().map(str::trim).unwrap_or_default();
        if params.mode == SearchMode::Fulltext && !text.is_empty() {
            let matched = stores.fulltext.filter_by_text(text, papers).await?;
            debug!(matched = matched.len(), "Full-text search complete");
            return Ok(matched);
        }
        Ok(papers)
    }

    pub async fn find_paper(&self, id: Uuid) -> Result<Option<Paper>, ShelfError> {
        self.stores().await?.papers.find_by_id(id)
    }

    /// Insert or update papers. Each item reports whether it was written;
    /// duplicates by title and authors report `false`.
    pub async fn update_papers(&self, papers: &[Paper]) -> Result<Vec<bool>, ShelfError> {
        let stores = self.stores().await?;
        let statuses = stores.papers.update(papers);

        let inserted = statuses.iter().filter(|s| **s == WriteStatus::Inserted).count();
        let updated = statuses.iter().filter(|s| **s == WriteStatus::Updated).count();
        self.session.notify(
            ChangeBatch::new(CollectionKind::Paper)
                .inserted(inserted)
                .modified(updated),
        );
        if inserted + updated > 0 {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Tag).modified(inserted + updated));
            self.session
                .notify(ChangeBatch::new(CollectionKind::Folder).modified(inserted + updated));
        }
        Ok(statuses.iter().map(WriteStatus::is_ok).collect())
    }

    /// Delete papers, releasing their categorizers and cache rows.
    pub async fn delete_papers(&self, ids: &[Uuid]) -> Result<usize, ShelfError> {
        let stores = self.stores().await?;
        let deleted = stores.papers.delete(ids)?;
        stores.fulltext.delete(ids)?;
        info!(deleted, "Deleted papers");

        self.session
            .notify(ChangeBatch::new(CollectionKind::Paper).deleted(deleted));
        if deleted > 0 {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Tag).modified(deleted));
            self.session
                .notify(ChangeBatch::new(CollectionKind::Folder).modified(deleted));
        }
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Tags and folders
    // -------------------------------------------------------------------------

    pub async fn load_categorizers(
        &self,
        kind: CategorizerKind,
        sort_by: &str,
        order: SortOrder,
    ) -> Result<Vec<Categorizer>, ShelfError> {
        self.stores().await?.categorizers().load(kind, sort_by, order)
    }

    pub async fn create_categorizer(
        &self,
        kind: CategorizerKind,
        name: &str,
        color: Option<&str>,
    ) -> Result<Categorizer, ShelfError> {
        let created = self.stores().await?.categorizers().create(kind, name, color)?;
        self.session.notify(ChangeBatch::new(kind.into()).inserted(1));
        Ok(created)
    }

    /// Delete a tag or folder by name, detaching it from all papers.
    pub async fn delete_categorizer(
        &self,
        kind: CategorizerKind,
        name: &str,
    ) -> Result<bool, ShelfError> {
        let deleted = self.stores().await?.categorizers().delete(kind, name)?;
        if deleted {
            self.session.notify(ChangeBatch::new(kind.into()).deleted(1));
            self.session
                .notify(ChangeBatch::new(CollectionKind::Paper).modified(1));
        }
        Ok(deleted)
    }

    pub async fn rename_categorizer(
        &self,
        kind: CategorizerKind,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, ShelfError> {
        let renamed = self
            .stores()
            .await?
            .categorizers()
            .rename(kind, old_name, new_name)?;
        if renamed {
            self.session.notify(ChangeBatch::new(kind.into()).modified(1));
        }
        Ok(renamed)
    }

    pub async fn colorize_categorizer(
        &self,
        kind: CategorizerKind,
        name: &str,
        color: &str,
    ) -> Result<bool, ShelfError> {
        let updated = self
            .stores()
            .await?
            .categorizers()
            .colorize(kind, name, color)?;
        if updated {
            self.session.notify(ChangeBatch::new(kind.into()).modified(1));
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Feeds
    // -------------------------------------------------------------------------

    pub async fn load_feeds(&self, sort_by: &str, order: SortOrder) -> Result<Vec<Feed>, ShelfError> {
        self.stores().await?.feeds.load_feeds(sort_by, order)
    }

    /// Subscribe to a new feed. Returns false when the name is taken.
    pub async fn insert_feed(&self, feed: &Feed) -> Result<bool, ShelfError> {
        let inserted = self.stores().await?.feeds.insert_feed(feed)?;
        if inserted {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Feed).inserted(1));
        }
        Ok(inserted)
    }

    pub async fn update_feeds(&self, feeds: &[Feed]) -> Result<Vec<bool>, ShelfError> {
        let results = self.stores().await?.feeds.update_feeds(feeds);
        let ok = results.iter().filter(|r| **r).count();
        self.session
            .notify(ChangeBatch::new(CollectionKind::Feed).modified(ok));
        Ok(results)
    }

    /// Delete feeds and every entity they own.
    pub async fn delete_feeds<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<usize, ShelfError> {
        let deleted = self.stores().await?.feeds.delete_feeds(names)?;
        if deleted > 0 {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Feed).deleted(deleted));
            self.session
                .notify(ChangeBatch::new(CollectionKind::FeedEntity).modified(deleted));
        }
        Ok(deleted)
    }

    pub async fn colorize_feed(&self, name: &str, color: &str) -> Result<bool, ShelfError> {
        let updated = self.stores().await?.feeds.colorize_feed(name, color)?;
        if updated {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Feed).modified(1));
        }
        Ok(updated)
    }

    pub async fn load_feed_entities(&self, query: &EntityQuery) -> Result<Vec<FeedEntity>, ShelfError> {
        self.stores().await?.feeds.load_entities(query)
    }

    /// Merge fetched entities into their feeds.
    pub async fn update_feed_entities(
        &self,
        entities: &[FeedEntity],
        ignore_read_state: bool,
    ) -> Result<Vec<bool>, ShelfError> {
        let results = self
            .stores()
            .await?
            .feeds
            .update_entities(entities, ignore_read_state);
        let ok = results.iter().filter(|r| **r).count();
        self.session
            .notify(ChangeBatch::new(CollectionKind::FeedEntity).modified(ok));
        if ok > 0 {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Feed).modified(ok));
        }
        Ok(results)
    }

    pub async fn delete_feed_entities(&self, ids: &[Uuid]) -> Result<usize, ShelfError> {
        let deleted = self.stores().await?.feeds.delete_entities(ids)?;
        self.session
            .notify(ChangeBatch::new(CollectionKind::FeedEntity).deleted(deleted));
        Ok(deleted)
    }

    pub async fn mark_feed_entities_read(&self, ids: &[Uuid], read: bool) -> Result<usize, ShelfError> {
        let updated = self.stores().await?.feeds.mark_read(ids, read)?;
        self.session
            .notify(ChangeBatch::new(CollectionKind::FeedEntity).modified(updated));
        Ok(updated)
    }

    /// Delete expired feed entities relative to `now`.
    pub async fn purge_feed_entities(&self, now: DateTime<Utc>) -> Result<RetentionResult, ShelfError> {
        let stores = self.stores().await?;
        let result = FeedRetention::run_purge(&stores.handle.library, &self.config().feeds, now)?;
        self.session
            .notify(ChangeBatch::new(CollectionKind::FeedEntity).deleted(result.total()));
        if !result.per_feed.is_empty() {
            self.session
                .notify(ChangeBatch::new(CollectionKind::Feed).modified(result.per_feed.len()));
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Smart filters
    // -------------------------------------------------------------------------

    pub async fn load_smart_filters(&self, order: SortOrder) -> Result<Vec<SmartFilter>, ShelfError> {
        self.stores().await?.filters.load(order)
    }

    pub async fn insert_smart_filter(
        &self,
        name: &str,
        filter: &str,
        color: Option<&str>,
    ) -> Result<bool, ShelfError> {
        let inserted = self.stores().await?.filters.insert(name, filter, color)?;
        if inserted {
            self.session
                .notify(ChangeBatch::new(CollectionKind::SmartFilter).inserted(1));
        }
        Ok(inserted)
    }

    pub async fn delete_smart_filter(&self, name: &str) -> Result<bool, ShelfError> {
        let deleted = self.stores().await?.filters.delete(name)?;
        if deleted {
            self.session
                .notify(ChangeBatch::new(CollectionKind::SmartFilter).deleted(1));
        }
        Ok(deleted)
    }

    pub async fn rename_smart_filter(&self, old_name: &str, new_name: &str) -> Result<bool, ShelfError> {
        let renamed = self.stores().await?.filters.rename(old_name, new_name)?;
        if renamed {
            self.session
                .notify(ChangeBatch::new(CollectionKind::SmartFilter).modified(1));
        }
        Ok(renamed)
    }

    pub async fn colorize_smart_filter(&self, name: &str, color: &str) -> Result<bool, ShelfError> {
        let updated = self.stores().await?.filters.colorize(name, color)?;
        if updated {
            self.session
                .notify(ChangeBatch::new(CollectionKind::SmartFilter).modified(1));
        }
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Full-text cache
    // -------------------------------------------------------------------------

    /// Re-extract text for the given papers, or for every paper.
    pub async fn reindex(&self, ids: Option<&[Uuid]>) -> Result<usize, ShelfError> {
        let stores = self.stores().await?;
        let mut papers = stores
            .papers
            .load(&query::FilterExpression::All, "add_time", SortOrder::Desc)?;
        if let Some(ids) = ids {
            papers.retain(|p| ids.contains(&p.id));
        }
        stores.fulltext.force_reindex(&papers).await
    }

    /// Whether a paper's primary file changed since it was indexed.
    pub async fn is_stale(&self, id: Uuid) -> Result<bool, ShelfError> {
        let stores = self.stores().await?;
        let paper = stores
            .papers
            .find_by_id(id)?
            .ok_or_else(|| ShelfError::NotFound(format!("paper {}", id)))?;
        stores.fulltext.is_stale(&paper).await
    }

    pub async fn thumbnail(&self, id: Uuid) -> Result<Option<Thumbnail>, ShelfError> {
        self.stores().await?.fulltext.thumbnail(id)
    }

    pub async fn set_thumbnail(&self, id: Uuid, thumbnail: &Thumbnail) -> Result<(), ShelfError> {
        self.stores().await?.fulltext.set_thumbnail(id, thumbnail)
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    pub async fn stats(&self) -> Result<LibraryStats, ShelfError> {
        let stores = self.stores().await?;
        let indexed_papers = stores.fulltext.indexed_count()?;
        stores.handle.library.with_conn(|conn| {
            let count = |sql: &str| -> Result<i64, ShelfError> {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(sql_err("count rows"))
            };
            Ok(LibraryStats {
                papers: count("SELECT COUNT(*) FROM papers")?,
                tags: count("SELECT COUNT(*) FROM categorizers WHERE kind = 'tag'")?,
                folders: count("SELECT COUNT(*) FROM categorizers WHERE kind = 'folder'")?,
                feeds: count("SELECT COUNT(*) FROM feeds")?,
                feed_entities: count("SELECT COUNT(*) FROM feed_entities")?,
                unread_feed_entities: count(
                    "SELECT COUNT(*) FROM feed_entities WHERE COALESCE(read, 0) = 0",
                )?,
                smart_filters: count("SELECT COUNT(*) FROM smart_filters")?,
                indexed_papers,
            })
        })
    }
}
