//! SQLite cache for fast queries and the local draft
//!
//! The cache sits in `.scribe/.cache/scribe.db`. It mirrors data from the
//! source-of-truth files (chapters.jsonl and published/*.md) for search and
//! listing; invalidation is based on file modification times.
//!
//! It also holds the `drafts` key-value table, the durable local cache an
//! editing session mirrors its unsaved content into. Drafts are not derived
//! from the source files, so rebuilds leave them alone.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::autosave::{DraftCache, DraftCacheError};
use crate::domain::{Chapter, ChapterId, PublishedChapter, PublishedId};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache not found at {0}")]
    NotFound(PathBuf),
}

/// SQLite cache for fast queries
pub struct Cache {
    db_path: PathBuf,

    /// chapters.jsonl, for mtime comparison
    chapters_path: PathBuf,

    /// published/ directory, for mtime comparison
    published_dir: PathBuf,

    conn: Connection,
}

impl Cache {
    /// Schema version - bump when schema changes to force rebuild
    const SCHEMA_VERSION: i32 = 1;

    /// Creates or opens the cache for a project
    pub fn open(project_root: &Path) -> Result<Self> {
        let scribe_dir = project_root.join(".scribe");
        let db_path = Self::db_path(project_root);
        let cache_dir = scribe_dir.join(".cache");

        fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", cache_dir.display())
        })?;

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;

        // WAL lets an editing session and one-shot commands share the file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let mut cache = Self {
            db_path,
            chapters_path: scribe_dir.join("chapters.jsonl"),
            published_dir: scribe_dir.join("published"),
            conn,
        };

        cache.ensure_schema()?;

        Ok(cache)
    }

    /// Opens the cache only if an earlier command created it
    pub fn open_existing(project_root: &Path) -> Result<Self> {
        let db_path = Self::db_path(project_root);
        if !db_path.exists() {
            return Err(CacheError::NotFound(db_path).into());
        }

        Self::open(project_root)
    }

    fn db_path(project_root: &Path) -> PathBuf {
        project_root.join(".scribe").join(".cache").join("scribe.db")
    }

    fn ensure_schema(&mut self) -> Result<()> {
        if self.get_schema_version()? != Self::SCHEMA_VERSION {
            self.create_schema()?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32> {
        let result: Option<i32> = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .optional()?;

        Ok(result.unwrap_or(0))
    }

    fn create_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS chapters_fts;
            DROP TABLE IF EXISTS published_fts;
            DROP TABLE IF EXISTS chapters;
            DROP TABLE IF EXISTS published;
            DROP TABLE IF EXISTS cache_meta;
            ",
        )?;

        self.conn.execute_batch(
            "
            CREATE TABLE chapters (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                author TEXT NOT NULL,
                heading TEXT NOT NULL,
                parsed TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE published (
                id TEXT PRIMARY KEY,
                chapter_id TEXT NOT NULL,
                visibility TEXT NOT NULL,
                author TEXT NOT NULL,
                email TEXT NOT NULL,
                heading TEXT NOT NULL,
                body TEXT NOT NULL,
                published_at TEXT NOT NULL
            );

            CREATE TABLE cache_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS drafts (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_chapters_email ON chapters(email);
            CREATE INDEX idx_published_chapter ON published(chapter_id);

            -- Full-text search
            CREATE VIRTUAL TABLE chapters_fts USING fts5(
                id,
                heading,
                parsed,
                content='chapters',
                content_rowid='rowid'
            );

            CREATE VIRTUAL TABLE published_fts USING fts5(
                id,
                heading,
                body,
                content='published',
                content_rowid='rowid'
            );

            -- Triggers to keep FTS in sync
            CREATE TRIGGER chapters_ai AFTER INSERT ON chapters BEGIN
                INSERT INTO chapters_fts(rowid, id, heading, parsed)
                VALUES (NEW.rowid, NEW.id, NEW.heading, NEW.parsed);
            END;

            CREATE TRIGGER chapters_ad AFTER DELETE ON chapters BEGIN
                INSERT INTO chapters_fts(chapters_fts, rowid, id, heading, parsed)
                VALUES ('delete', OLD.rowid, OLD.id, OLD.heading, OLD.parsed);
            END;

            CREATE TRIGGER published_ai AFTER INSERT ON published BEGIN
                INSERT INTO published_fts(rowid, id, heading, body)
                VALUES (NEW.rowid, NEW.id, NEW.heading, NEW.body);
            END;

            CREATE TRIGGER published_ad AFTER DELETE ON published BEGIN
                INSERT INTO published_fts(published_fts, rowid, id, heading, body)
                VALUES ('delete', OLD.rowid, OLD.id, OLD.heading, OLD.body);
            END;
            ",
        )?;

        self.conn.execute(
            &format!("PRAGMA user_version = {}", Self::SCHEMA_VERSION),
            [],
        )?;

        Ok(())
    }

    /// Checks if the cache needs to be rebuilt
    pub fn is_stale(&self) -> Result<bool> {
        let Some(cache_mtime) = self.last_rebuild()? else {
            return Ok(true);
        };

        if self.chapters_path.exists() {
            let chapters_mtime = fs::metadata(&self.chapters_path)?.modified()?;
            if chapters_mtime > cache_mtime {
                return Ok(true);
            }
        }

        if self.published_dir.exists() {
            // The directory mtime moves when snapshots are added or removed
            if fs::metadata(&self.published_dir)?.modified()? > cache_mtime {
                return Ok(true);
            }

            for entry in fs::read_dir(&self.published_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "md") {
                    if let Ok(mtime) = fs::metadata(&path).and_then(|m| m.modified()) {
                        if mtime > cache_mtime {
                            return Ok(true);
                        }
                    }
                }
            }
        }

        Ok(false)
    }

    /// Time of the last rebuild, if there was one
    pub fn last_rebuild(&self) -> Result<Option<SystemTime>> {
        let millis: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM cache_meta WHERE key = 'last_rebuild'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(millis
            .and_then(|s| s.parse::<u64>().ok())
            .map(|ms| SystemTime::UNIX_EPOCH + Duration::from_millis(ms)))
    }

    fn update_cache_mtime(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        self.conn.execute(
            "INSERT OR REPLACE INTO cache_meta (key, value) VALUES ('last_rebuild', ?1)",
            params![now.to_string()],
        )?;

        Ok(())
    }

    /// Rebuilds the mirrored tables from source files
    pub fn rebuild(
        &mut self,
        chapters: &HashMap<ChapterId, Chapter>,
        published: &HashMap<PublishedId, PublishedChapter>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM chapters", [])?;
        tx.execute("DELETE FROM published", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chapters (id, email, author, heading, parsed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for chapter in chapters.values() {
                stmt.execute(params![
                    chapter.id.to_string(),
                    chapter.email,
                    chapter.author,
                    chapter.heading,
                    chapter.parsed,
                    chapter.created_at.to_rfc3339(),
                    chapter.updated_at.to_rfc3339(),
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO published (id, chapter_id, visibility, author, email, heading, body, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for snapshot in published.values() {
                let body = snapshot
                    .document()
                    .map(|d| d.plain_text())
                    .unwrap_or_default();

                stmt.execute(params![
                    snapshot.id.to_string(),
                    snapshot.chapter_id.to_string(),
                    snapshot.visibility.to_string(),
                    snapshot.author,
                    snapshot.email,
                    snapshot.heading,
                    body,
                    snapshot.published_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;

        self.update_cache_mtime()?;

        tracing::debug!(
            chapters = chapters.len(),
            published = published.len(),
            "cache rebuilt"
        );
        Ok(())
    }

    /// Query: an author's chapters, most recently updated first
    pub fn list_chapters(&self, email: &str) -> Result<Vec<CachedChapter>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, heading, updated_at FROM chapters
             WHERE email = ?1 COLLATE NOCASE
             ORDER BY updated_at DESC, id",
        )?;

        let chapters = stmt
            .query_map(params![email], |row| {
                Ok(CachedChapter {
                    id: row.get(0)?,
                    heading: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chapters)
    }

    /// Query: row counts as (chapters, published, drafts)
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok((count("chapters")?, count("published")?, count("drafts")?))
    }

    /// Query: full-text search over the author's chapters and over
    /// snapshots that are public or the author's own
    pub fn search(&self, query: &str, email: &str) -> Result<Vec<SearchResult>> {
        let query = fts_query(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();

        {
            let mut stmt = self.conn.prepare(
                "SELECT chapters_fts.id, chapters_fts.heading,
                        snippet(chapters_fts, 2, '<mark>', '</mark>', '...', 32)
                 FROM chapters_fts JOIN chapters c ON c.rowid = chapters_fts.rowid
                 WHERE chapters_fts MATCH ?1 AND c.email = ?2 COLLATE NOCASE
                 ORDER BY rank LIMIT 50",
            )?;

            let rows = stmt.query_map(params![query, email], |row| {
                Ok(SearchResult {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    snippet: row.get(2)?,
                    result_type: SearchResultType::Chapter,
                })
            })?;

            for row in rows {
                results.push(row?);
            }
        }

        {
            let mut stmt = self.conn.prepare(
                "SELECT published_fts.id, published_fts.heading,
                        snippet(published_fts, 2, '<mark>', '</mark>', '...', 32)
                 FROM published_fts JOIN published p ON p.rowid = published_fts.rowid
                 WHERE published_fts MATCH ?1
                 AND (p.visibility = 'public' OR p.email = ?2 COLLATE NOCASE)
                 ORDER BY rank LIMIT 50",
            )?;

            let rows = stmt.query_map(params![query, email], |row| {
                Ok(SearchResult {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    snippet: row.get(2)?,
                    result_type: SearchResultType::Published,
                })
            })?;

            for row in rows {
                results.push(row?);
            }
        }

        Ok(results)
    }

    /// Returns the path to the cache database
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

/// Quotes each term so user input never hits FTS5 query syntax
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl DraftCache for Cache {
    fn read(&self, key: &str) -> Result<Option<String>, DraftCacheError> {
        self.conn
            .query_row(
                "SELECT value FROM drafts WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DraftCacheError::Unavailable(e.to_string()))
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), DraftCacheError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO drafts (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, chrono::Utc::now().to_rfc3339()],
            )
            .map(|_| ())
            .map_err(|e| DraftCacheError::Unavailable(e.to_string()))
    }

    fn clear(&mut self, key: &str) -> Result<(), DraftCacheError> {
        self.conn
            .execute("DELETE FROM drafts WHERE key = ?1", params![key])
            .map(|_| ())
            .map_err(|e| DraftCacheError::Unavailable(e.to_string()))
    }
}

/// Result from a search query
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub result_type: SearchResultType,
}

/// Type of search result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchResultType {
    Chapter,
    Published,
}

/// Cached chapter row for listings
#[derive(Debug, Clone, Serialize)]
pub struct CachedChapter {
    pub id: String,
    pub heading: String,
    pub updated_at: String,
}
