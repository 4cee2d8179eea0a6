//! Full-text cache over primary attachment files.
//!
//! Rows live in the separate cache store, keyed by paper id. Extraction is
//! lazy: a paper is indexed the first time a full-text search needs it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shelf_core::error::ShelfError;
use shelf_core::types::{FullTextEntry, Paper, Thumbnail};
use shelf_extract::{ContentHasher, TextExtractor};

use crate::db::{row_uuid, sql_err, Database};

/// Extracted text and thumbnails for papers.
pub struct FullTextCache {
    db: Arc<Database>,
    extractor: Arc<dyn TextExtractor>,
    hasher: Arc<dyn ContentHasher>,
    library_dir: PathBuf,
}

impl FullTextCache {
    pub fn new(
        db: Arc<Database>,
        extractor: Arc<dyn TextExtractor>,
        hasher: Arc<dyn ContentHasher>,
        library_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            extractor,
            hasher,
            library_dir,
        }
    }

    /// Index every paper that has a primary file and no cache row yet.
    ///
    /// Returns the number of papers indexed.
    pub async fn ensure_indexed(&self, papers: &[Paper]) -> Result<usize, ShelfError> {
        let indexed = self.indexed_ids()?;
        let pending: Vec<&Paper> = papers
            .iter()
            .filter(|p| !p.main_url.is_empty() && !indexed.contains(&p.id))
            .collect();

        for paper in &pending {
            self.index_one(paper).await?;
        }
        if !pending.is_empty() {
            debug!(count = pending.len(), "Indexed papers for full-text search");
        }
        Ok(pending.len())
    }

    /// Re-extract every paper with a primary file, overwriting cached text.
    pub async fn force_reindex(&self, papers: &[Paper]) -> Result<usize, ShelfError> {
        let mut count = 0;
        for paper in papers.iter().filter(|p| !p.main_url.is_empty()) {
            self.index_one(paper).await?;
            count += 1;
        }
        info!(count, "Reindexed full-text cache");
        Ok(count)
    }

    /// Keep the candidates whose extracted text contains `query`, ignoring
    /// case. Candidate order is preserved.
    pub async fn filter_by_text(
        &self,
        query: &str,
        candidates: Vec<Paper>,
    ) -> Result<Vec<Paper>, ShelfError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(candidates);
        }

        self.ensure_indexed(&candidates).await?;

        let matching: HashSet<Uuid> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT paper_id FROM fulltext_cache
                     WHERE indexed = 1 AND instr(shelf_fold(text), shelf_fold(?1)) > 0",
                )
                .map_err(sql_err("prepare full-text match"))?;
            let rows = stmt
                .query_map(rusqlite::params![query], |row| row_uuid(row, 0))
                .map_err(sql_err("match full text"))?;
            let mut ids = HashSet::new();
            for row in rows {
                ids.insert(row.map_err(sql_err("read full-text match"))?);
            }
            Ok(ids)
        })?;

        Ok(candidates
            .into_iter()
            .filter(|p| matching.contains(&p.id))
            .collect())
    }

    /// Drop cache rows of deleted papers.
    pub fn delete(&self, ids: &[Uuid]) -> Result<usize, ShelfError> {
        self.db.safe_write(|conn| {
            let mut removed = 0;
            for id in ids {
                removed += conn
                    .execute(
                        "DELETE FROM fulltext_cache WHERE paper_id = ?1",
                        rusqlite::params![id.to_string()],
                    )
                    .map_err(sql_err("delete cache row"))?;
            }
            Ok(removed)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<FullTextEntry>, ShelfError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT paper_id, text, content_hash, thumbnail, thumb_width, thumb_height
                 FROM fulltext_cache WHERE paper_id = ?1",
                rusqlite::params![id.to_string()],
                |row| {
                    let data: Option<Vec<u8>> = row.get(3)?;
                    let width: Option<u32> = row.get(4)?;
                    let height: Option<u32> = row.get(5)?;
                    Ok(FullTextEntry {
                        paper_id: row_uuid(row, 0)?,
                        text: row.get(1)?,
                        content_hash: row.get(2)?,
                        thumbnail: data.map(|data| Thumbnail {
                            data,
                            width: width.unwrap_or(0),
                            height: height.unwrap_or(0),
                        }),
                    })
                },
            )
            .optional()
            .map_err(sql_err("load cache row"))
        })
    }

    /// Store a rendered thumbnail, creating the row if needed.
    ///
    /// A row created this way does not count as indexed.
    pub fn set_thumbnail(&self, id: Uuid, thumbnail: &Thumbnail) -> Result<(), ShelfError> {
        self.db.safe_write(|conn| {
            conn.execute(
                "INSERT INTO fulltext_cache (paper_id, thumbnail, thumb_width, thumb_height, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(paper_id) DO UPDATE SET
                     thumbnail = excluded.thumbnail,
                     thumb_width = excluded.thumb_width,
                     thumb_height = excluded.thumb_height,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    id.to_string(),
                    thumbnail.data,
                    thumbnail.width,
                    thumbnail.height,
                    Utc::now().timestamp(),
                ],
            )
            .map_err(sql_err("store thumbnail"))?;
            Ok(())
        })
    }

    pub fn thumbnail(&self, id: Uuid) -> Result<Option<Thumbnail>, ShelfError> {
        Ok(self.get(id)?.and_then(|entry| entry.thumbnail))
    }

    /// Whether the primary file changed since it was indexed.
    ///
    /// Papers never indexed are stale.
    pub async fn is_stale(&self, paper: &Paper) -> Result<bool, ShelfError> {
        let stored: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT content_hash FROM fulltext_cache WHERE paper_id = ?1 AND indexed = 1",
                rusqlite::params![paper.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("load content hash"))
        })?;
        let Some(stored) = stored else {
            return Ok(true);
        };
        let current = self.hasher.hash(&self.resolve(&paper.main_url)).await?;
        Ok(current != stored)
    }

    /// Number of indexed rows.
    pub fn indexed_count(&self) -> Result<i64, ShelfError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM fulltext_cache WHERE indexed = 1",
                [],
                |row| row.get(0),
            )
            .map_err(sql_err("count cache rows"))
        })
    }

    async fn index_one(&self, paper: &Paper) -> Result<(), ShelfError> {
        let file = self.resolve(&paper.main_url);

        let text = match self.extractor.extract(&file).await {
            Ok(text) => text,
            Err(e) => {
                warn!(paper = %paper.id, file = %file.display(), error = %e, "Text extraction failed, caching empty text");
                String::new()
            }
        };
        let hash = match self.hasher.hash(&file).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(paper = %paper.id, file = %file.display(), error = %e, "Hashing failed");
                String::new()
            }
        };

        self.db.safe_write(|conn| {
            conn.execute(
                "INSERT INTO fulltext_cache (paper_id, text, content_hash, indexed, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(paper_id) DO UPDATE SET
                     text = excluded.text,
                     content_hash = excluded.content_hash,
                     indexed = 1,
                     updated_at = excluded.updated_at",
                rusqlite::params![paper.id.to_string(), text, hash, Utc::now().timestamp()],
            )
            .map_err(sql_err("write cache row"))?;
            Ok(())
        })
    }

    fn indexed_ids(&self) -> Result<HashSet<Uuid>, ShelfError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT paper_id FROM fulltext_cache WHERE indexed = 1")
                .map_err(sql_err("prepare indexed ids"))?;
            let rows = stmt
                .query_map([], |row| row_uuid(row, 0))
                .map_err(sql_err("load indexed ids"))?;
            let mut ids = HashSet::new();
            for row in rows {
                ids.insert(row.map_err(sql_err("read indexed id"))?);
            }
            Ok(ids)
        })
    }

    /// File references are relative to the library directory.
    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.library_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::StoreSchema;
    use shelf_extract::{MockHasher, MockTextExtractor, Sha256Hasher};

    fn paper(title: &str, file: &str) -> Paper {
        let mut p = Paper::new(title, "Someone");
        p.main_url = file.to_string();
        p
    }

    fn cache_with(extractor: Arc<MockTextExtractor>) -> FullTextCache {
        let db = Arc::new(Database::in_memory(StoreSchema::Cache).unwrap());
        FullTextCache::new(db, extractor, Arc::new(MockHasher), PathBuf::from("/library"))
    }

    #[tokio::test]
    async fn test_ensure_indexed_skips_existing_rows() {
        let extractor = Arc::new(MockTextExtractor::with_text("body"));
        let cache = cache_with(extractor.clone());
        let papers = vec![paper("A", "a.pdf"), paper("B", "b.pdf"), paper("C", "")];

        assert_eq!(cache.ensure_indexed(&papers).await.unwrap(), 2);
        assert_eq!(cache.ensure_indexed(&papers).await.unwrap(), 0);
        assert_eq!(extractor.calls(), 2);
        assert_eq!(cache.indexed_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_force_reindex_overwrites() {
        let extractor = Arc::new(MockTextExtractor::with_text("fresh"));
        let cache = cache_with(extractor.clone());
        let p = paper("A", "a.pdf");

        cache.ensure_indexed(std::slice::from_ref(&p)).await.unwrap();
        assert_eq!(cache.force_reindex(std::slice::from_ref(&p)).await.unwrap(), 1);
        assert_eq!(extractor.calls(), 2);
        assert_eq!(cache.get(p.id).unwrap().unwrap().text, "fresh");
        assert_eq!(cache.indexed_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filter_by_text_is_case_insensitive_and_ordered() {
        let extractor = Arc::new(
            MockTextExtractor::with_text("nothing relevant")
                .with_file("t.pdf", "Scaled Dot-Product ATTENTION")
                .with_file("r.pdf", "recurrent attention models"),
        );
        let cache = cache_with(extractor);
        let transformer = paper("Transformer", "t.pdf");
        let rnn = paper("RNN", "r.pdf");
        let other = paper("Other", "o.pdf");

        let hits = cache
            .filter_by_text(
                "attention",
                vec![rnn.clone(), other.clone(), transformer.clone()],
            )
            .await
            .unwrap();
        let titles: Vec<&str> = hits.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["RNN", "Transformer"]);
    }

    #[tokio::test]
    async fn test_filter_by_text_folds_non_ascii() {
        let extractor = Arc::new(
            MockTextExtractor::with_text("nothing relevant")
                .with_file("fr.pdf", "ÉTUDE DES RÉSEAUX"),
        );
        let cache = cache_with(extractor);
        let french = paper("Étude", "fr.pdf");
        let other = paper("Other", "o.pdf");

        let hits = cache
            .filter_by_text("réseaux", vec![other, french.clone()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, french.id);
    }

    #[tokio::test]
    async fn test_extraction_failure_caches_empty_text() {
        let extractor = Arc::new(MockTextExtractor::with_text("x"));
        let cache = cache_with(extractor);
        // A trailing separator leaves no file name, which the mock rejects.
        let p = paper("Broken", "/");

        assert_eq!(cache.ensure_indexed(std::slice::from_ref(&p)).await.unwrap(), 1);
        let entry = cache.get(p.id).unwrap().unwrap();
        assert_eq!(entry.text, "");
        let hits = cache.filter_by_text("x", vec![p]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_thumbnail() {
        let cache = cache_with(Arc::new(MockTextExtractor::with_text("x")));
        let p = paper("A", "a.pdf");
        let thumb = Thumbnail {
            data: vec![1, 2, 3],
            width: 10,
            height: 20,
        };

        cache.set_thumbnail(p.id, &thumb).unwrap();
        assert_eq!(cache.thumbnail(p.id).unwrap(), Some(thumb.clone()));
        // A thumbnail alone does not mark the paper indexed.
        assert_eq!(cache.ensure_indexed(std::slice::from_ref(&p)).await.unwrap(), 1);
        assert_eq!(cache.thumbnail(p.id).unwrap(), Some(thumb));

        assert_eq!(cache.delete(&[p.id]).unwrap(), 1);
        assert!(cache.get(p.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_is_stale_tracks_file_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"first").unwrap();

        let db = Arc::new(Database::in_memory(StoreSchema::Cache).unwrap());
        let cache = FullTextCache::new(
            db,
            Arc::new(MockTextExtractor::with_text("body")),
            Arc::new(Sha256Hasher),
            dir.path().to_path_buf(),
        );
        let p = paper("A", "a.txt");

        assert!(cache.is_stale(&p).await.unwrap());
        cache.ensure_indexed(std::slice::from_ref(&p)).await.unwrap();
        assert!(!cache.is_stale(&p).await.unwrap());

        std::fs::write(dir.path().join("a.txt"), b"second").unwrap();
        assert!(cache.is_stale(&p).await.unwrap());
    }
}
