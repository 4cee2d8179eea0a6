use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Publication type of a paper.
///
/// Stored as its integer discriminant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PubType {
    #[default]
    Journal,
    Conference,
    Others,
    Book,
}

impl PubType {
    pub fn as_i64(&self) -> i64 {
        match self {
            PubType::Journal => 0,
            PubType::Conference => 1,
            PubType::Others => 2,
            PubType::Book => 3,
        }
    }

    /// Unknown discriminants map to `Others`.
    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => PubType::Journal,
            1 => PubType::Conference,
            3 => PubType::Book,
            _ => PubType::Others,
        }
    }
}

/// The two kinds of user taxonomy rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizerKind {
    Tag,
    Folder,
}

impl CategorizerKind {
    /// Value of the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorizerKind::Tag => "tag",
            CategorizerKind::Folder => "folder",
        }
    }
}

/// How the search string is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Fuzzy wildcard match over title, authors, publication and note.
    #[default]
    General,
    /// The search string is a filter expression.
    Advanced,
    /// Match against the extracted text of the primary file.
    Fulltext,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A reference to a tag or folder row, as held by a paper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorizer {
    pub id: Uuid,
    pub kind: CategorizerKind,
    pub name: String,
    /// Number of papers currently referencing this row.
    pub count: i64,
    pub color: Option<String>,
}

/// A bibliographic record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: Uuid,
    pub add_time: DateTime<Utc>,
    pub title: String,
    /// Comma-joined author list.
    pub authors: String,
    pub publication: String,
    pub pub_time: String,
    pub pub_type: PubType,
    pub doi: String,
    pub arxiv: String,
    pub pages: String,
    pub volume: String,
    pub number: String,
    pub publisher: String,
    /// Primary file reference (base name relative to the library directory).
    pub main_url: String,
    pub supp_urls: Vec<String>,
    pub tags: Vec<Categorizer>,
    pub folders: Vec<Categorizer>,
    pub flag: bool,
    pub rating: i64,
    pub note: String,
    pub codes: Vec<String>,
}

impl Paper {
    /// A fresh record with a time-ordered id and the current add time.
    pub fn new(title: impl Into<String>, authors: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            add_time: Utc::now(),
            title: title.into(),
            authors: authors.into(),
            publication: String::new(),
            pub_time: String::new(),
            pub_type: PubType::default(),
            doi: String::new(),
            arxiv: String::new(),
            pages: String::new(),
            volume: String::new(),
            number: String::new(),
            publisher: String::new(),
            main_url: String::new(),
            supp_urls: Vec::new(),
            tags: Vec::new(),
            folders: Vec::new(),
            flag: false,
            rating: 0,
            note: String::new(),
            codes: Vec::new(),
        }
    }

    /// Names of the categorizers of one kind attached to this paper.
    pub fn categorizer_names(&self, kind: CategorizerKind) -> Vec<String> {
        let refs = match kind {
            CategorizerKind::Tag => &self.tags,
            CategorizerKind::Folder => &self.folders,
        };
        refs.iter().map(|c| c.name.clone()).collect()
    }

    /// Attach categorizers by name only; rows are resolved when the paper is
    /// written.
    pub fn with_tags(mut self, names: &[&str]) -> Self {
        self.tags = names
            .iter()
            .map(|n| Categorizer::named(CategorizerKind::Tag, n))
            .collect();
        self
    }

    pub fn with_folders(mut self, names: &[&str]) -> Self {
        self.folders = names
            .iter()
            .map(|n| Categorizer::named(CategorizerKind::Folder, n))
            .collect();
        self
    }
}

impl Categorizer {
    /// An unresolved reference carrying only a name.
    pub fn named(kind: CategorizerKind, name: &str) -> Self {
        Self {
            id: Uuid::nil(),
            kind,
            name: name.to_string(),
            count: 0,
            color: None,
        }
    }
}

/// A subscription feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Number of live feed entities.
    pub count: i64,
    pub color: Option<String>,
}

impl Feed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            url: url.into(),
            count: 0,
            color: None,
        }
    }
}

/// An article fetched from a feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEntity {
    pub id: Uuid,
    pub feed: Feed,
    pub fetch_time: DateTime<Utc>,
    pub title: String,
    pub authors: String,
    pub abstract_text: String,
    pub publication: String,
    pub pub_time: String,
    pub pub_type: PubType,
    pub doi: String,
    pub arxiv: String,
    pub main_url: String,
    pub pages: String,
    pub volume: String,
    pub number: String,
    pub publisher: String,
    pub read: bool,
}

impl FeedEntity {
    pub fn new(feed: Feed, title: impl Into<String>, authors: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            feed,
            fetch_time: Utc::now(),
            title: title.into(),
            authors: authors.into(),
            abstract_text: String::new(),
            publication: String::new(),
            pub_time: String::new(),
            pub_type: PubType::default(),
            doi: String::new(),
            arxiv: String::new(),
            main_url: String::new(),
            pages: String::new(),
            volume: String::new(),
            number: String::new(),
            publisher: String::new(),
            read: false,
        }
    }
}

/// A saved query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartFilter {
    pub id: Uuid,
    pub name: String,
    /// Raw advanced-mode filter expression.
    pub filter: String,
    pub color: Option<String>,
    /// Always 1. Kept for row parity with categorizers; nothing references a
    /// saved filter.
    pub count: i64,
}

/// Cached extraction output for one paper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTextEntry {
    pub paper_id: Uuid,
    pub text: String,
    /// Hash of the primary file bytes at extraction time.
    pub content_hash: String,
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Search parameters
// =============================================================================

/// Parameters of a paper search as issued by the UI layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
    /// Restrict to flagged papers.
    pub flag: bool,
    pub tag: Option<String>,
    pub folder: Option<String>,
    pub mode: SearchMode,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl SearchParams {
    pub fn text(search: &str, mode: SearchMode) -> Self {
        Self {
            search: Some(search.to_string()),
            mode,
            ..Default::default()
        }
    }

    pub fn tag(name: &str) -> Self {
        Self {
            tag: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn folder(name: &str) -> Self {
        Self {
            folder: Some(name.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_type_discriminants() {
        for t in [
            PubType::Journal,
            PubType::Conference,
            PubType::Others,
            PubType::Book,
        ] {
            assert_eq!(PubType::from_i64(t.as_i64()), t);
        }
        assert_eq!(PubType::from_i64(42), PubType::Others);
    }

    #[test]
    fn test_paper_new_assigns_time_ordered_ids() {
        let a = Paper::new("A", "X");
        let b = Paper::new("B", "Y");
        assert_eq!(a.id.get_version_num(), 7);
        assert_ne!(a.id, b.id);
        assert!(a.tags.is_empty());
        assert_eq!(a.rating, 0);
    }

    #[test]
    fn test_with_tags_keeps_names() {
        let paper = Paper::new("T", "A").with_tags(&["nlp", "seminal"]);
        assert_eq!(
            paper.categorizer_names(CategorizerKind::Tag),
            vec!["nlp", "seminal"]
        );
        assert!(paper.categorizer_names(CategorizerKind::Folder).is_empty());
        assert!(paper.tags.iter().all(|t| t.id.is_nil()));
    }

    #[test]
    fn test_search_mode_serde() {
        let json = serde_json::to_string(&SearchMode::Fulltext).unwrap();
        assert_eq!(json, "\"fulltext\"");
        let mode: SearchMode = serde_json::from_str("\"advanced\"").unwrap();
        assert_eq!(mode, SearchMode::Advanced);
    }

    #[test]
    fn test_sort_order_sql() {
        assert_eq!(SortOrder::Asc.as_sql(), "ASC");
        assert_eq!(SortOrder::default().as_sql(), "DESC");
    }
}
