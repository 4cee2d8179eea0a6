use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collections that emit change notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Paper,
    Tag,
    Folder,
    Feed,
    FeedEntity,
    SmartFilter,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 6] = [
        CollectionKind::Paper,
        CollectionKind::Tag,
        CollectionKind::Folder,
        CollectionKind::Feed,
        CollectionKind::FeedEntity,
        CollectionKind::SmartFilter,
    ];

    /// Human-readable name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Paper => "paper",
            CollectionKind::Tag => "tag",
            CollectionKind::Folder => "folder",
            CollectionKind::Feed => "feed",
            CollectionKind::FeedEntity => "feed_entity",
            CollectionKind::SmartFilter => "smart_filter",
        }
    }
}

impl From<crate::types::CategorizerKind> for CollectionKind {
    fn from(kind: crate::types::CategorizerKind) -> Self {
        match kind {
            crate::types::CategorizerKind::Tag => CollectionKind::Tag,
            crate::types::CategorizerKind::Folder => CollectionKind::Folder,
        }
    }
}

/// Aggregate counts for one committed write against a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub kind: CollectionKind,
    pub deletions: usize,
    pub insertions: usize,
    pub modifications: usize,
    pub timestamp: DateTime<Utc>,
}

impl ChangeBatch {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            deletions: 0,
            insertions: 0,
            modifications: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn inserted(mut self, n: usize) -> Self {
        self.insertions += n;
        self
    }

    pub fn deleted(mut self, n: usize) -> Self {
        self.deletions += n;
        self
    }

    pub fn modified(mut self, n: usize) -> Self {
        self.modifications += n;
        self
    }

    /// True when the batch carries no changes and need not be published.
    pub fn is_empty(&self) -> bool {
        self.deletions == 0 && self.insertions == 0 && self.modifications == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CategorizerKind;

    #[test]
    fn test_collection_names_are_unique() {
        let mut names: Vec<&str> = CollectionKind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CollectionKind::ALL.len());
    }

    #[test]
    fn test_categorizer_kind_conversion() {
        assert_eq!(CollectionKind::from(CategorizerKind::Tag), CollectionKind::Tag);
        assert_eq!(
            CollectionKind::from(CategorizerKind::Folder),
            CollectionKind::Folder
        );
    }

    #[test]
    fn test_change_batch_builders() {
        let batch = ChangeBatch::new(CollectionKind::Paper)
            .inserted(2)
            .modified(1);
        assert_eq!(batch.insertions, 2);
        assert_eq!(batch.modifications, 1);
        assert_eq!(batch.deletions, 0);
        assert!(!batch.is_empty());
        assert!(ChangeBatch::new(CollectionKind::Tag).is_empty());
    }

    #[test]
    fn test_change_batch_serialization() {
        let batch = ChangeBatch::new(CollectionKind::FeedEntity).deleted(3);
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("\"feed_entity\""));
        assert!(json.contains("\"deletions\":3"));
    }
}
