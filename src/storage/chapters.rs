//! JSONL storage for chapters
//!
//! Chapters are stored in `.scribe/chapters.jsonl` with one JSON object per
//! line. Readers take a shared lock on the store file. Every writer holds an
//! exclusive lock on `chapters.jsonl.lock` for its whole read-modify-write
//! cycle, so concurrent `new`, `delete` and autosaves never drop each
//! other's changes.
//!
//! [`ChapterGateway`] puts an author in front of the store and serves as the
//! persistence gateway for editing sessions.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::autosave::{ChapterUpdate, CreatedChapter, GatewayError, PersistenceGateway};
use crate::domain::{Author, Chapter, ChapterId};

/// Store for chapter data in JSONL format
#[derive(Debug, Clone)]
pub struct ChapterStore {
    path: PathBuf,
}

/// Exclusive write access to a [`ChapterStore`], released on drop
#[derive(Debug)]
pub struct WriteLock {
    _file: File,
}

impl ChapterStore {
    /// Creates a new chapter store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the default store for a project
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".scribe").join("chapters.jsonl"))
    }

    /// Returns the path to the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("jsonl.lock")
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    /// Blocks until no other writer holds the store
    pub fn lock(&self) -> Result<WriteLock> {
        self.ensure_parent()?;

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire write lock on chapter store")?;

        Ok(WriteLock { _file: file })
    }

    /// Runs a read-modify-write cycle under the write lock. The store is
    /// rewritten only when `modify` reports a change.
    pub fn modify<T>(
        &self,
        modify: impl FnOnce(&mut HashMap<ChapterId, Chapter>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _lock = self.lock()?;

        let mut chapters = self.read_all()?;
        let (value, changed) = modify(&mut chapters)?;
        if changed {
            self.write_all(&chapters)?;
        }
        Ok(value)
    }

    /// Reads all chapters from the store. Later lines win over earlier ones.
    pub fn read_all(&self) -> Result<HashMap<ChapterId, Chapter>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open chapter store: {}", self.path.display()))?;

        file.lock_shared()
            .context("Failed to acquire read lock on chapter store")?;

        let reader = BufReader::new(&file);
        let mut chapters = HashMap::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;

            if line.trim().is_empty() {
                continue;
            }

            let chapter: Chapter = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse chapter at line {}", line_num + 1))?;

            chapters.insert(chapter.id.clone(), chapter);
        }

        Ok(chapters)
    }

    /// Reads one chapter
    pub fn get(&self, id: &ChapterId) -> Result<Option<Chapter>> {
        Ok(self.read_all()?.remove(id))
    }

    /// Chapters owned by an author, most recently updated first
    pub fn list_for(&self, author: &Author) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .read_all()?
            .into_values()
            .filter(|c| c.is_owned_by(author))
            .collect();

        chapters.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chapters)
    }

    /// Full rewrite through a temp file and rename; callers hold the write lock
    fn write_all(&self, chapters: &HashMap<ChapterId, Chapter>) -> Result<()> {
        self.ensure_parent()?;

        let temp_path = self.path.with_extension("jsonl.tmp");

        {
            let file = File::create(&temp_path)
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

            let mut writer = BufWriter::new(&file);

            // Sorted by ID for stable diffs
            let mut sorted: Vec<_> = chapters.values().collect();
            sorted.sort_by(|a, b| a.id.cmp(&b.id));

            for chapter in sorted {
                let line = serde_json::to_string(chapter).context("Failed to serialize chapter")?;
                writeln!(writer, "{}", line).context("Failed to write chapter")?;
            }

            writer.flush().context("Failed to flush chapter store")?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }

    /// Appends a single chapter without a full rewrite
    pub fn append(&self, chapter: &Chapter) -> Result<()> {
        let _lock = self.lock()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open chapter store: {}", self.path.display()))?;

        // Readers holding a shared lock never see a partial line
        file.lock_exclusive()
            .context("Failed to acquire write lock on chapter store")?;

        let mut writer = BufWriter::new(&file);
        let line = serde_json::to_string(chapter).context("Failed to serialize chapter")?;
        writeln!(writer, "{}", line).context("Failed to write chapter")?;

        writer.flush().context("Failed to flush chapter store")?;

        Ok(())
    }

    /// Replaces a single chapter (reads all, updates, writes all)
    pub fn update(&self, chapter: &Chapter) -> Result<()> {
        self.modify(|chapters| {
            chapters.insert(chapter.id.clone(), chapter.clone());
            Ok(((), true))
        })
    }

    /// Removes a chapter by ID
    pub fn remove(&self, id: &ChapterId) -> Result<bool> {
        self.modify(|chapters| {
            let removed = chapters.remove(id).is_some();
            Ok((removed, removed))
        })
    }
}

/// The chapter store as seen by one author
#[derive(Debug, Clone)]
pub struct ChapterGateway {
    store: ChapterStore,
    author: Author,
}

impl ChapterGateway {
    pub fn new(store: ChapterStore, author: Author) -> Self {
        Self { store, author }
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    fn owned(&self, chapters: &HashMap<ChapterId, Chapter>, id: &ChapterId) -> Result<(), GatewayError> {
        match chapters.get(id) {
            None => Err(GatewayError::NotFound(id.clone())),
            Some(chapter) if !chapter.is_owned_by(&self.author) => {
                Err(GatewayError::Forbidden(id.clone()))
            }
            Some(_) => Ok(()),
        }
    }
}

fn unavailable(error: anyhow::Error) -> GatewayError {
    GatewayError::Unavailable(format!("{:#}", error))
}

impl PersistenceGateway for ChapterGateway {
    fn create_chapter(&self, author: &Author) -> Result<CreatedChapter, GatewayError> {
        let chapter = Chapter::new(author);
        self.store.append(&chapter).map_err(unavailable)?;

        tracing::debug!(chapter = %chapter.id, "created chapter");
        Ok(CreatedChapter {
            chapter_id: chapter.id,
            initial_heading: chapter.heading,
        })
    }

    fn load_chapter(&self, id: &ChapterId) -> Result<Chapter, GatewayError> {
        let mut chapters = self.store.read_all().map_err(unavailable)?;
        self.owned(&chapters, id)?;
        chapters
            .remove(id)
            .ok_or_else(|| GatewayError::NotFound(id.clone()))
    }

    fn update_chapter(&self, update: &ChapterUpdate) -> Result<(), GatewayError> {
        let _lock = self.store.lock().map_err(unavailable)?;

        let mut chapters = self.store.read_all().map_err(unavailable)?;
        self.owned(&chapters, &update.chapter_id)?;

        if let Some(chapter) = chapters.get_mut(&update.chapter_id) {
            chapter.set_content(&update.heading, &update.content, &update.plain_text);
        }
        self.store.write_all(&chapters).map_err(unavailable)?;

        tracing::debug!(chapter = %update.chapter_id, "chapter updated");
        Ok(())
    }
}
