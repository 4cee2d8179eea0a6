//! Paper persistence.
//!
//! Papers are written one per write scope so a rejected item never undoes
//! its neighbours. Categorizer references are replaced wholesale on every
//! write: the previous set is unlinked, then the desired set is linked.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use shelf_core::error::ShelfError;
use shelf_core::types::{Categorizer, CategorizerKind, Paper, PubType, SortOrder};

use crate::categorizer::{CategorizerLinker, UnlinkMode};
use crate::db::{from_unix, row_json_list, row_uuid, sql_err, Database};
use crate::query::FilterExpression;

const PAPER_COLUMNS: &str = "p.id, p.add_time, p.title, p.authors, p.publication, p.pub_time,
     p.pub_type, p.doi, p.arxiv, p.pages, p.volume, p.number, p.publisher, p.main_url,
     p.supp_urls, p.flag, p.rating, p.note, p.codes";

/// Outcome of writing one paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Inserted,
    Updated,
    /// Another paper already has the same title and authors, or the write
    /// failed.
    Rejected,
}

impl WriteStatus {
    pub fn is_ok(&self) -> bool {
        !matches!(self, WriteStatus::Rejected)
    }
}

/// Map a user-facing sort key to a column; unknown keys sort by add time.
pub fn sort_column(sort_by: &str) -> &'static str {
    match sort_by {
        "title" => "p.title",
        "authors" => "p.authors",
        "publication" => "p.publication",
        "pub_time" | "pubTime" => "p.pub_time",
        "pub_type" | "pubType" => "p.pub_type",
        "rating" => "p.rating",
        "flag" => "p.flag",
        _ => "p.add_time",
    }
}

pub struct PaperRepository {
    db: Arc<Database>,
    linker: CategorizerLinker,
}

impl PaperRepository {
    pub fn new(db: Arc<Database>) -> Self {
        let linker = CategorizerLinker::new(db.clone());
        Self { db, linker }
    }

    pub fn linker(&self) -> &CategorizerLinker {
        &self.linker
    }

    /// Papers matching `filter`, with their tags and folders.
    pub fn load(
        &self,
        filter: &FilterExpression,
        sort_by: &str,
        order: SortOrder,
    ) -> Result<Vec<Paper>, ShelfError> {
        let where_clause = filter.to_sql();
        let sql = format!(
            "SELECT {} FROM papers p WHERE {} ORDER BY {} {}, p.id ASC",
            PAPER_COLUMNS,
            where_clause.clause,
            sort_column(sort_by),
            order.as_sql()
        );
        debug!(sql = %sql, "Loading papers");

        self.db.with_conn(|conn| {
            let mut papers = {
                let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare paper load"))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params_from_iter(where_clause.params.iter()),
                        read_paper,
                    )
                    .map_err(sql_err("load papers"))?;
                let mut papers = Vec::new();
                for row in rows {
                    papers.push(row.map_err(sql_err("read paper"))?);
                }
                papers
            };

            let mut links = all_links(conn)?;
            for paper in &mut papers {
                if let Some((tags, folders)) = links.remove(&paper.id) {
                    paper.tags = tags;
                    paper.folders = folders;
                }
            }
            Ok(papers)
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Paper>, ShelfError> {
        self.db.with_conn(|conn| paper_by_id(conn, id))
    }

    pub fn count(&self) -> Result<i64, ShelfError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
                .map_err(sql_err("count papers"))
        })
    }

    /// Insert or update papers, one write scope per paper.
    pub fn update(&self, papers: &[Paper]) -> Vec<WriteStatus> {
        papers
            .iter()
            .map(|paper| match self.db.safe_write(|conn| self.write_one(conn, paper)) {
                Ok(status) => status,
                Err(e) => {
                    warn!(paper = %paper.id, title = %paper.title, error = %e, "Paper write failed");
                    WriteStatus::Rejected
                }
            })
            .collect()
    }

    /// Delete papers and release their categorizers. Returns the number of
    /// rows removed.
    pub fn delete(&self, ids: &[Uuid]) -> Result<usize, ShelfError> {
        self.db.safe_write(|conn| {
            let mut deleted = 0;
            for id in ids {
                let (tags, folders) = links_of(conn, *id)?;
                self.linker
                    .unlink_many(&tags, CategorizerKind::Tag, UnlinkMode::GarbageCollect)?;
                self.linker
                    .unlink_many(&folders, CategorizerKind::Folder, UnlinkMode::GarbageCollect)?;
                conn.execute(
                    "DELETE FROM paper_categorizers WHERE paper_id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(sql_err("detach paper"))?;
                deleted += conn
                    .execute(
                        "DELETE FROM papers WHERE id = ?1",
                        rusqlite::params![id.to_string()],
                    )
                    .map_err(sql_err("delete paper"))?;
            }
            Ok(deleted)
        })
    }

    fn write_one(&self, conn: &Connection, paper: &Paper) -> Result<WriteStatus, ShelfError> {
        // Reject duplicates before touching any counts.
        let duplicate: Option<String> = conn
            .query_row(
                "SELECT id FROM papers WHERE title = ?1 AND authors = ?2 AND id <> ?3 LIMIT 1",
                rusqlite::params![paper.title, paper.authors, paper.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("check duplicate paper"))?;
        if let Some(existing) = duplicate {
            warn!(title = %paper.title, existing = %existing, "Duplicate paper rejected");
            return Ok(WriteStatus::Rejected);
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM papers WHERE id = ?1",
                rusqlite::params![paper.id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map_err(sql_err("check paper"))?
            .is_some();

        let (old_tags, old_folders) = links_of(conn, paper.id)?;
        self.linker
            .unlink_many(&old_tags, CategorizerKind::Tag, UnlinkMode::GarbageCollect)?;
        self.linker
            .unlink_many(&old_folders, CategorizerKind::Folder, UnlinkMode::GarbageCollect)?;
        let tags = self
            .linker
            .link_many(&paper.categorizer_names(CategorizerKind::Tag), CategorizerKind::Tag)?;
        let folders = self.linker.link_many(
            &paper.categorizer_names(CategorizerKind::Folder),
            CategorizerKind::Folder,
        )?;

        conn.execute(
            "INSERT INTO papers (id, partition, add_time, title, authors, publication, pub_time,
                 pub_type, doi, arxiv, pages, volume, number, publisher, main_url, supp_urls,
                 flag, rating, note, codes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20)
             ON CONFLICT(id) DO UPDATE SET
                 add_time = excluded.add_time, title = excluded.title,
                 authors = excluded.authors, publication = excluded.publication,
                 pub_time = excluded.pub_time, pub_type = excluded.pub_type,
                 doi = excluded.doi, arxiv = excluded.arxiv, pages = excluded.pages,
                 volume = excluded.volume, number = excluded.number,
                 publisher = excluded.publisher, main_url = excluded.main_url,
                 supp_urls = excluded.supp_urls, flag = excluded.flag,
                 rating = excluded.rating, note = excluded.note, codes = excluded.codes",
            rusqlite::params![
                paper.id.to_string(),
                self.db.partition(),
                paper.add_time.timestamp(),
                paper.title,
                paper.authors,
                paper.publication,
                paper.pub_time,
                paper.pub_type.as_i64(),
                paper.doi,
                paper.arxiv,
                paper.pages,
                paper.volume,
                paper.number,
                paper.publisher,
                paper.main_url,
                serde_json::to_string(&paper.supp_urls)?,
                paper.flag,
                paper.rating,
                paper.note,
                serde_json::to_string(&paper.codes)?,
            ],
        )
        .map_err(sql_err("write paper"))?;

        conn.execute(
            "DELETE FROM paper_categorizers WHERE paper_id = ?1",
            rusqlite::params![paper.id.to_string()],
        )
        .map_err(sql_err("clear paper links"))?;
        for (position, categorizer) in tags.iter().chain(folders.iter()).enumerate() {
            conn.execute(
                "INSERT OR IGNORE INTO paper_categorizers (paper_id, categorizer_id, position)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    paper.id.to_string(),
                    categorizer.id.to_string(),
                    position as i64
                ],
            )
            .map_err(sql_err("link paper"))?;
        }

        Ok(if exists {
            WriteStatus::Updated
        } else {
            WriteStatus::Inserted
        })
    }
}

fn paper_by_id(conn: &Connection, id: Uuid) -> Result<Option<Paper>, ShelfError> {
    let paper = conn
        .query_row(
            &format!("SELECT {} FROM papers p WHERE p.id = ?1", PAPER_COLUMNS),
            rusqlite::params![id.to_string()],
            read_paper,
        )
        .optional()
        .map_err(sql_err("find paper"))?;
    match paper {
        Some(mut paper) => {
            let (tags, folders) = links_of(conn, id)?;
            paper.tags = tags;
            paper.folders = folders;
            Ok(Some(paper))
        }
        None => Ok(None),
    }
}

type Links = (Vec<Categorizer>, Vec<Categorizer>);

fn links_of(conn: &Connection, paper_id: Uuid) -> Result<Links, ShelfError> {
    let mut stmt = conn
        .prepare(
            "SELECT pc.paper_id, c.id, c.kind, c.name, c.count, c.color
             FROM paper_categorizers pc JOIN categorizers c ON c.id = pc.categorizer_id
             WHERE pc.paper_id = ?1
             ORDER BY pc.position",
        )
        .map_err(sql_err("prepare paper links"))?;
    let rows = stmt
        .query_map(rusqlite::params![paper_id.to_string()], read_link)
        .map_err(sql_err("load paper links"))?;
    let mut links: Links = (Vec::new(), Vec::new());
    for row in rows {
        let (_, categorizer) = row.map_err(sql_err("read paper link"))?;
        push_link(&mut links, categorizer);
    }
    Ok(links)
}

fn all_links(conn: &Connection) -> Result<HashMap<Uuid, Links>, ShelfError> {
    let mut stmt = conn
        .prepare(
            "SELECT pc.paper_id, c.id, c.kind, c.name, c.count, c.color
             FROM paper_categorizers pc JOIN categorizers c ON c.id = pc.categorizer_id
             ORDER BY pc.paper_id, pc.position",
        )
        .map_err(sql_err("prepare links"))?;
    let rows = stmt.query_map([], read_link).map_err(sql_err("load links"))?;
    let mut links: HashMap<Uuid, Links> = HashMap::new();
    for row in rows {
        let (paper_id, categorizer) = row.map_err(sql_err("read link"))?;
        push_link(links.entry(paper_id).or_default(), categorizer);
    }
    Ok(links)
}

fn push_link(links: &mut Links, categorizer: Categorizer) {
    match categorizer.kind {
        CategorizerKind::Tag => links.0.push(categorizer),
        CategorizerKind::Folder => links.1.push(categorizer),
    }
}

fn read_link(row: &Row<'_>) -> rusqlite::Result<(Uuid, Categorizer)> {
    let kind = match row.get::<_, String>(2)?.as_str() {
        "folder" => CategorizerKind::Folder,
        _ => CategorizerKind::Tag,
    };
    Ok((
        row_uuid(row, 0)?,
        Categorizer {
            id: row_uuid(row, 1)?,
            kind,
            name: row.get(3)?,
            count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            color: row.get(5)?,
        },
    ))
}

fn read_paper(row: &Row<'_>) -> rusqlite::Result<Paper> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    Ok(Paper {
        id: row_uuid(row, 0)?,
        add_time: from_unix(row.get::<_, Option<i64>>(1)?.unwrap_or(0)),
        title: text(2)?,
        authors: text(3)?,
        publication: text(4)?,
        pub_time: text(5)?,
        pub_type: PubType::from_i64(row.get::<_, Option<i64>>(6)?.unwrap_or(2)),
        doi: text(7)?,
        arxiv: text(8)?,
        pages: text(9)?,
        volume: text(10)?,
        number: text(11)?,
        publisher: text(12)?,
        main_url: text(13)?,
        supp_urls: row_json_list(row, 14)?,
        tags: Vec::new(),
        folders: Vec::new(),
        flag: row.get::<_, Option<bool>>(15)?.unwrap_or(false),
        rating: row.get::<_, Option<i64>>(16)?.unwrap_or(0),
        note: text(17)?,
        codes: row_json_list(row, 18)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::StoreSchema;
    use crate::query::{compile, compile_at};
    use shelf_core::types::{SearchMode, SearchParams};

    fn repo() -> PaperRepository {
        PaperRepository::new(Arc::new(Database::in_memory(StoreSchema::Library).unwrap()))
    }

    fn tag_count(repo: &PaperRepository, name: &str) -> Option<i64> {
        repo.linker()
            .find_by_name(CategorizerKind::Tag, name)
            .unwrap()
            .map(|c| c.count)
    }

    fn load_all(repo: &PaperRepository) -> Vec<Paper> {
        repo.load(&FilterExpression::All, "title", SortOrder::Asc)
            .unwrap()
    }

    #[test]
    fn test_insert_and_reload() {
        let repo = repo();
        let mut paper = Paper::new("Attention Is All You Need", "A, B")
            .with_tags(&["nlp", "seminal"])
            .with_folders(&["Reading"]);
        paper.supp_urls = vec!["appendix.pdf".into()];
        paper.rating = 5;

        assert_eq!(repo.update(&[paper.clone()]), vec![WriteStatus::Inserted]);

        let stored = repo.find_by_id(paper.id).unwrap().unwrap();
        assert_eq!(stored.title, paper.title);
        assert_eq!(stored.supp_urls, vec!["appendix.pdf"]);
        assert_eq!(stored.rating, 5);
        assert_eq!(stored.categorizer_names(CategorizerKind::Tag), vec!["nlp", "seminal"]);
        assert_eq!(stored.categorizer_names(CategorizerKind::Folder), vec!["Reading"]);
        assert_eq!(stored.add_time.timestamp(), paper.add_time.timestamp());
    }

    #[test]
    fn test_duplicate_is_rejected_without_dangling_counts() {
        let repo = repo();
        let first = Paper::new("T", "A").with_tags(&["nlp"]);
        let dup = Paper::new("T", "A").with_tags(&["nlp", "extra"]);

        let statuses = repo.update(&[first, dup]);
        assert_eq!(statuses, vec![WriteStatus::Inserted, WriteStatus::Rejected]);
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(tag_count(&repo, "nlp"), Some(1));
        assert_eq!(tag_count(&repo, "extra"), None);
    }

    #[test]
    fn test_update_replaces_categorizer_set() {
        let repo = repo();
        let paper = Paper::new("T", "A").with_tags(&["keep", "drop"]);
        repo.update(&[paper.clone()]);

        let mut edited = repo.find_by_id(paper.id).unwrap().unwrap();
        edited.tags = vec![
            edited.tags[0].clone(),
            Categorizer::named(CategorizerKind::Tag, "new"),
        ];
        edited.note = "edited".into();
        assert_eq!(repo.update(&[edited]), vec![WriteStatus::Updated]);

        assert_eq!(tag_count(&repo, "keep"), Some(1));
        assert_eq!(tag_count(&repo, "drop"), None);
        assert_eq!(tag_count(&repo, "new"), Some(1));
        let stored = repo.find_by_id(paper.id).unwrap().unwrap();
        assert_eq!(stored.note, "edited");
        assert_eq!(stored.categorizer_names(CategorizerKind::Tag), vec!["keep", "new"]);
    }

    #[test]
    fn test_update_keeps_shared_counts() {
        let repo = repo();
        let a = Paper::new("A", "X").with_tags(&["shared"]);
        let b = Paper::new("B", "Y").with_tags(&["shared"]);
        repo.update(&[a.clone(), b]);
        assert_eq!(tag_count(&repo, "shared"), Some(2));

        // Rewriting with the same set churns but nets to the same count.
        repo.update(&[a]);
        assert_eq!(tag_count(&repo, "shared"), Some(2));
    }

    #[test]
    fn test_delete_releases_categorizers() {
        let repo = repo();
        let a = Paper::new("A", "X").with_tags(&["nlp", "solo"]);
        let b = Paper::new("B", "Y").with_tags(&["nlp"]);
        repo.update(&[a.clone(), b]);

        assert_eq!(repo.delete(&[a.id]).unwrap(), 1);
        assert_eq!(tag_count(&repo, "nlp"), Some(1));
        assert_eq!(tag_count(&repo, "solo"), None);
        assert!(repo.find_by_id(a.id).unwrap().is_none());
        assert_eq!(repo.delete(&[a.id]).unwrap(), 0);
    }

    #[test]
    fn test_load_by_tag_and_general_search() {
        let repo = repo();
        let attention = Paper::new("Attention Is All You Need", "Vaswani").with_tags(&["nlp"]);
        let resnet = Paper::new("Deep Residual Learning", "He").with_tags(&["vision"]);
        repo.update(&[attention.clone(), resnet]);

        let by_tag = repo
            .load(&compile(&SearchParams::tag("nlp")), "add_time", SortOrder::Desc)
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, attention.id);

        let fuzzy = repo
            .load(
                &compile(&SearchParams::text("attention need", SearchMode::General)),
                "title",
                SortOrder::Asc,
            )
            .unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].title, "Attention Is All You Need");
    }

    #[test]
    fn test_load_advanced_filter() {
        let repo = repo();
        let mut good = Paper::new("Good", "X");
        good.rating = 5;
        good.flag = true;
        let mut meh = Paper::new("Meh", "Y");
        meh.rating = 2;
        repo.update(&[good, meh]);

        let params = SearchParams::text("rating >= 4 AND flag == true", SearchMode::Advanced);
        let found = repo
            .load(&compile_at(&params, chrono::Utc::now()), "title", SortOrder::Asc)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Good");

        let titles = repo
            .load(
                &compile(&SearchParams::text("title ENDSWITH 'eh' OR title BEGINSWITH[c] 'go'", SearchMode::Advanced)),
                "title",
                SortOrder::Asc,
            )
            .unwrap();
        assert_eq!(titles.len(), 2);
    }

    #[test]
    fn test_case_insensitive_matching_folds_unicode() {
        let repo = repo();
        let uber = Paper::new("Über Attention", "Müller");
        repo.update(&[uber.clone(), Paper::new("Plain Attention", "Smith")]);

        let search = |text: &str, mode: SearchMode| {
            repo.load(&compile(&SearchParams::text(text, mode)), "title", SortOrder::Asc)
                .unwrap()
        };

        assert_eq!(search("attention", SearchMode::General).len(), 2);
        let by_title = search("über", SearchMode::General);
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, uber.id);
        assert_eq!(search("MÜLLER", SearchMode::General).len(), 1);

        assert_eq!(search("title CONTAINS[c] 'über'", SearchMode::Advanced).len(), 1);
        assert_eq!(search("authors BEGINSWITH[c] 'MÜL'", SearchMode::Advanced).len(), 1);
        assert_eq!(search("title ==[c] 'ÜBER ATTENTION'", SearchMode::Advanced).len(), 1);
        assert_eq!(search("title LIKE[c] 'über*'", SearchMode::Advanced).len(), 1);
        // Without the flag the comparison stays exact.
        assert!(search("title CONTAINS 'über'", SearchMode::Advanced).is_empty());
    }

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(sort_column("rating"), "p.rating");
        assert_eq!(sort_column("; DROP TABLE papers"), "p.add_time");
        let repo = repo();
        let mut a = Paper::new("A", "X");
        a.rating = 1;
        let mut b = Paper::new("B", "Y");
        b.rating = 3;
        repo.update(&[a, b]);
        let sorted = repo
            .load(&FilterExpression::All, "rating", SortOrder::Desc)
            .unwrap();
        assert_eq!(sorted[0].title, "B");
        assert_eq!(load_all(&repo)[0].title, "A");
    }
}
