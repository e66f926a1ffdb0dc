//! # Storage Layer
//!
//! Persistence for Scribe with git-friendly file formats.
//!
//! ## Storage Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Chapters | JSONL (one JSON per line) | `.scribe/chapters.jsonl` |
//! | Published snapshots | YAML frontmatter + canonical content | `.scribe/published/{id}.md` |
//! | Config | TOML | `.scribe/config.toml` |
//! | Search index and local draft | SQLite (auto-regenerated, drafts kept) | `.scribe/.cache/scribe.db` |
//! | Editing-session working file | Markdown | `.scribe/drafts/working.md` |
//!
//! ## Concurrency Safety
//!
//! - [`ChapterStore`] uses file locking (`fs2`) for concurrent access
//! - [`Cache`] runs SQLite in WAL mode so an editing session and other
//!   commands can share it
//! - All file writes are atomic (temp file + rename)
//!
//! ## Key Types
//!
//! - [`Project`] - Entry point for accessing a Scribe project
//! - [`ChapterStore`] / [`ChapterGateway`] - Chapters, and the persistence
//!   gateway editing sessions save through
//! - [`PublishedStore`] - Published snapshots
//! - [`Cache`] - Search, listings and the draft cache
//! - [`Config`] - Project and global configuration

mod chapters;
mod published;
mod config;
mod project;
mod cache;

pub use chapters::{ChapterGateway, ChapterStore, WriteLock};
pub use published::PublishedStore;
pub use config::{
    resolve_author, AuthorConfig, Config, ConfigError, GlobalConfig, OutputFormat, ProjectConfig,
    PublishConfig,
};
pub use project::{Project, ProjectError};
pub use cache::{Cache, CacheError, CachedChapter, SearchResult, SearchResultType};
