//! Local durable draft cache
//!
//! The cache mirrors the session's unsaved content so a crash or restart
//! before the debounce fires loses nothing. It holds a single draft: the
//! `content` and `plainText` keys belong to whichever chapter the
//! `activeChapterId` key points at.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DraftCacheError {
    #[error("Draft cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value port the controller writes its draft through
pub trait DraftCache {
    fn read(&self, key: &str) -> Result<Option<String>, DraftCacheError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), DraftCacheError>;
    fn clear(&mut self, key: &str) -> Result<(), DraftCacheError>;
}

/// The fixed key names, with an optional prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    pub content: String,
    pub plain_text: String,
    pub active_chapter: String,
}

impl CacheKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            content: format!("{}content", prefix),
            plain_text: format!("{}plainText", prefix),
            active_chapter: format!("{}activeChapterId", prefix),
        }
    }

    /// Reads the cached draft, if any chapter is active
    pub fn read_draft<C: DraftCache + ?Sized>(
        &self,
        cache: &C,
    ) -> Result<Option<CachedDraft>, DraftCacheError> {
        let Some(chapter_id) = cache.read(&self.active_chapter)? else {
            return Ok(None);
        };

        Ok(Some(CachedDraft {
            chapter_id,
            content: cache.read(&self.content)?,
            plain_text: cache.read(&self.plain_text)?,
        }))
    }

    /// Removes all three keys
    pub fn clear_all<C: DraftCache + ?Sized>(&self, cache: &mut C) -> Result<(), DraftCacheError> {
        cache.clear(&self.active_chapter)?;
        cache.clear(&self.content)?;
        cache.clear(&self.plain_text)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("")
    }
}

/// Raw cached values; the chapter id and content are not validated here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDraft {
    pub chapter_id: String,
    pub content: Option<String>,
    pub plain_text: Option<String>,
}

/// In-memory cache used by tests and one-off sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryDraftCache {
    entries: BTreeMap<String, String>,
    writes: Vec<String>,
}

impl MemoryDraftCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in the order they were written
    pub fn write_log(&self) -> &[String] {
        &self.writes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

impl DraftCache for MemoryDraftCache {
    fn read(&self, key: &str) -> Result<Option<String>, DraftCacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), DraftCacheError> {
        self.writes.push(key.to_string());
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self, key: &str) -> Result<(), DraftCacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
