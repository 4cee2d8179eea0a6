//! CLI argument definitions for the Shelf maintenance tool.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use shelf_core::types::{CategorizerKind, SearchMode, SearchParams, SortOrder};

/// Shelf - inspect and maintain a local reference library.
#[derive(Parser, Debug)]
#[command(name = "shelf", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Library directory holding the stores and attached files.
    #[arg(short = 'd', long = "library-dir", global = true)]
    pub library_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search papers and print them as JSON lines.
    Search {
        /// Search string, interpreted according to --mode.
        query: Option<String>,

        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Restrict to papers with this tag.
        #[arg(long)]
        tag: Option<String>,

        /// Restrict to papers in this folder.
        #[arg(long)]
        folder: Option<String>,

        /// Only flagged papers.
        #[arg(long)]
        flagged: bool,

        /// Sort column (title, authors, add_time, rating, ...).
        #[arg(long)]
        sort_by: Option<String>,

        /// Sort ascending instead of descending.
        #[arg(long)]
        asc: bool,
    },

    /// List tags or folders with their usage counts.
    Tags {
        /// List folders instead of tags.
        #[arg(long)]
        folders: bool,

        /// Sort by usage count instead of name.
        #[arg(long)]
        by_count: bool,
    },

    /// Delete expired feed articles.
    PurgeFeeds,

    /// Re-extract full text for every paper with an attached file.
    Reindex,

    /// Print row counts for the library.
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    General,
    Advanced,
    Fulltext,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::General => SearchMode::General,
            ModeArg::Advanced => SearchMode::Advanced,
            ModeArg::Fulltext => SearchMode::Fulltext,
        }
    }
}

impl Command {
    /// Build search parameters from a `search` invocation.
    ///
    /// Returns `None` for other subcommands.
    pub fn search_params(&self, default_mode: SearchMode) -> Option<SearchParams> {
        let Command::Search {
            query,
            mode,
            tag,
            folder,
            flagged,
            sort_by,
            asc,
        } = self
        else {
            return None;
        };
        Some(SearchParams {
            search: query.clone(),
            flag: *flagged,
            tag: tag.clone(),
            folder: folder.clone(),
            mode: mode.map(SearchMode::from).unwrap_or(default_mode),
            sort_by: sort_by.clone(),
            sort_order: asc.then_some(SortOrder::Asc),
        })
    }
}

/// Kind and sort column for a `tags` invocation.
pub fn categorizer_listing(folders: bool, by_count: bool) -> (CategorizerKind, &'static str) {
    let kind = if folders {
        CategorizerKind::Folder
    } else {
        CategorizerKind::Tag
    };
    (kind, if by_count { "count" } else { "name" })
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SHELF_CONFIG env var > platform default (~/.shelf/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SHELF_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the library directory.
    ///
    /// Priority: --library-dir flag > SHELF_LIBRARY_DIR env var > config file value.
    /// Returns `None` if neither is overridden (use config default).
    pub fn resolve_library_dir(&self) -> Option<String> {
        if let Some(ref p) = self.library_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("SHELF_LIBRARY_DIR").ok()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".shelf").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".shelf").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_arguments() {
        let args = CliArgs::parse_from([
            "shelf", "search", "attention", "--mode", "fulltext", "--tag", "nlp", "--asc",
        ]);
        let params = args.command.search_params(SearchMode::General).unwrap();
        assert_eq!(params.search.as_deref(), Some("attention"));
        assert_eq!(params.mode, SearchMode::Fulltext);
        assert_eq!(params.tag.as_deref(), Some("nlp"));
        assert_eq!(params.sort_order, Some(SortOrder::Asc));
        assert!(!params.flag);
    }

    #[test]
    fn test_search_uses_default_mode() {
        let args = CliArgs::parse_from(["shelf", "search", "rating > 3"]);
        let params = args.command.search_params(SearchMode::Advanced).unwrap();
        assert_eq!(params.mode, SearchMode::Advanced);
        assert_eq!(params.sort_order, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["shelf", "stats", "--library-dir", "/tmp/lib"]);
        assert!(matches!(args.command, Command::Stats));
        assert_eq!(args.resolve_library_dir().as_deref(), Some("/tmp/lib"));
        assert!(args.command.search_params(SearchMode::General).is_none());
    }

    #[test]
    fn test_config_flag_wins() {
        let args = CliArgs::parse_from(["shelf", "-c", "/etc/shelf.toml", "reindex"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/shelf.toml"));
    }

    #[test]
    fn test_categorizer_listing() {
        assert_eq!(categorizer_listing(false, false), (CategorizerKind::Tag, "name"));
        assert_eq!(categorizer_listing(true, true), (CategorizerKind::Folder, "count"));
    }
}
