//! Shelf Storage crate - SQLite persistence for the reference library.
//!
//! Provides the session that owns the library and cache stores, the
//! versioned migration pipeline, repositories for papers, categorizers,
//! feeds and smart filters, the filter compiler, the full-text cache and
//! the [`Library`] facade that ties them together.

pub mod categorizer;
pub mod db;
pub mod feed;
pub mod fulltext;
pub mod library;
pub mod migrations;
pub mod query;
pub mod repository;
pub mod retention;
pub mod session;
pub mod smart_filter;

pub use categorizer::{normalize_names, CategorizerLinker, UnlinkMode, UnlinkOutcome};
pub use db::Database;
pub use feed::{EntityQuery, FeedRepository};
pub use fulltext::FullTextCache;
pub use library::{Library, LibraryStats};
pub use migrations::{run_migrations, StoreSchema, LATEST_CACHE_VERSION, LATEST_VERSION};
pub use query::{compile, parse_advanced, CompareOp, Field, FilterExpression, Value};
pub use repository::{PaperRepository, WriteStatus};
pub use retention::{FeedRetention, RetentionResult};
pub use session::{
    CloudSession, CloudSessionProvider, CredentialProvider, MockCloudProvider, NoCloud, Session,
    StaticCredentials, StoreConfiguration, StoreHandle,
};
pub use smart_filter::SmartFilterRepository;
