//! Project management
//!
//! Handles project initialization and provides access to stores.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::{Cache, ChapterGateway, ChapterStore, Config, PublishedStore};
use crate::domain::Author;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Not in a scribe project. Run 'scribe init' first.")]
    NotInProject,

    #[error("Failed to create project: {0}")]
    CreateFailed(String),
}

const DEFAULT_CONFIG: &str = r#"# Scribe configuration

[autosave]
# Quiet period before an edit is saved
debounce_ms = 5000
# Headings are cut to this many characters
heading_length = 50
# Prefix for the local draft cache keys
cache_key_prefix = ""

[author]
# name = "Your Name"
# email = "you@example.com"

[publish]
default_visibility = "public"
"#;

const GITIGNORE: &str = r#"# SQLite cache and local drafts (regenerated or machine-local)
.cache/

# Working files of editing sessions
drafts/

# Writer lock of the chapter store
chapters.jsonl.lock
"#;

/// A Scribe project
pub struct Project {
    root: PathBuf,
    config: Config,
}

impl Project {
    /// Opens an existing project at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(".scribe").is_dir() {
            return Err(ProjectError::NotInProject.into());
        }

        let config = Config::for_project(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the project at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let root = Config::find_project_root().ok_or(ProjectError::NotInProject)?;

        Self::open(root)
    }

    /// Initializes a new project at the given path. Existing files are kept.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let scribe_dir = root.join(".scribe");

        for dir in [
            scribe_dir.clone(),
            scribe_dir.join("published"),
            scribe_dir.join("drafts"),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| ProjectError::CreateFailed(e.to_string()))
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let config_path = scribe_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = scribe_dir.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(&gitignore_path, GITIGNORE).with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        Self::open(root)
    }

    /// Returns the project root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .scribe directory path
    pub fn scribe_dir(&self) -> PathBuf {
        self.root.join(".scribe")
    }

    /// Returns the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the author for this project
    pub fn author(&self) -> Result<Author> {
        Ok(self.config.author()?)
    }

    /// Returns the chapter store
    pub fn chapter_store(&self) -> ChapterStore {
        ChapterStore::for_project(&self.root)
    }

    /// Returns the chapter store as the given author sees it
    pub fn gateway(&self, author: Author) -> ChapterGateway {
        ChapterGateway::new(self.chapter_store(), author)
    }

    /// Returns the published snapshot store
    pub fn published_store(&self) -> PublishedStore {
        PublishedStore::for_project(&self.root)
    }

    /// Returns the directory for editing-session working files
    pub fn drafts_dir(&self) -> PathBuf {
        self.scribe_dir().join("drafts")
    }

    /// Returns the default working file of `scribe edit`
    pub fn working_file(&self) -> PathBuf {
        self.drafts_dir().join("working.md")
    }

    /// Opens the SQLite cache for this project
    pub fn cache(&self) -> Result<Cache> {
        Cache::open(&self.root)
    }

    /// Rebuilds the cache from source files
    pub fn rebuild_cache(&self) -> Result<Cache> {
        let mut cache = self.cache()?;
        let chapters = self.chapter_store().read_all()?;
        let published = self.published_store().read_all()?;
        cache.rebuild(&chapters, &published)?;
        Ok(cache)
    }

    /// Gets the cache if it's fresh, or rebuilds it if stale
    pub fn get_or_rebuild_cache(&self) -> Result<Cache> {
        let mut cache = self.cache()?;

        if cache.is_stale()? {
            let chapters = self.chapter_store().read_all()?;
            let published = self.published_store().read_all()?;
            cache.rebuild(&chapters, &published)?;
        }

        Ok(cache)
    }
}
