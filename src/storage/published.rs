//! Markdown storage for published snapshots
//!
//! Snapshots are stored as files in `.scribe/published/`, one per snapshot.
//! Each file has YAML frontmatter for metadata; the body is the canonical
//! content string captured at publish time. Reactions and comments are
//! recorded in the frontmatter through [`PublishedStore::modify`], which
//! holds the directory's `.lock` file for the whole read-modify-write.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::domain::{ChapterId, PublishedChapter, PublishedFrontmatter, PublishedId};

/// Store for published snapshots as markdown files
#[derive(Debug, Clone)]
pub struct PublishedStore {
    dir: PathBuf,
}

impl PublishedStore {
    /// Creates a new store at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the default store for a project
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".scribe").join("published"))
    }

    /// Returns the directory containing snapshot files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, id: &PublishedId) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    fn read_from_file(&self, path: &Path) -> Result<PublishedChapter> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;

        parse_snapshot(&content).with_context(|| format!("Invalid snapshot file: {}", path.display()))
    }

    /// Writes a snapshot atomically (temp file + rename)
    pub fn write(&self, published: &PublishedChapter) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let path = self.snapshot_path(&published.id);
        let temp_path = path.with_extension("md.tmp");
        let content = render_snapshot(published)?;

        fs::write(&temp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

        fs::rename(&temp_path, &path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Updates one snapshot under the write lock. Returns None when the
    /// snapshot does not exist.
    pub fn modify<T>(
        &self,
        id: &PublishedId,
        modify: impl FnOnce(&mut PublishedChapter) -> Result<T>,
    ) -> Result<Option<T>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let lock_path = self.dir.join(".lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        lock.lock_exclusive()
            .context("Failed to acquire write lock on published snapshots")?;

        let Some(mut published) = self.read(id)? else {
            return Ok(None);
        };
        let value = modify(&mut published)?;
        self.write(&published)?;

        Ok(Some(value))
    }

    /// Reads all snapshots. Unreadable files are skipped with a warning.
    pub fn read_all(&self) -> Result<HashMap<PublishedId, PublishedChapter>> {
        let mut snapshots = HashMap::new();

        if !self.dir.exists() {
            return Ok(snapshots);
        }

        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read directory: {}", self.dir.display()))?
        {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.extension().is_some_and(|e| e == "md") {
                match self.read_from_file(&path) {
                    Ok(published) => {
                        snapshots.insert(published.id.clone(), published);
                    }
                    Err(e) => tracing::warn!(path = %path.display(), "skipping snapshot: {:#}", e),
                }
            }
        }

        Ok(snapshots)
    }

    /// Lists snapshots, newest first
    pub fn list(&self, public_only: bool) -> Result<Vec<PublishedChapter>> {
        let mut snapshots: Vec<_> = self
            .read_all()?
            .into_values()
            .filter(|p| !public_only || p.is_public())
            .collect();

        snapshots.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    /// Snapshots taken from one chapter
    pub fn for_chapter(&self, chapter_id: &ChapterId) -> Result<Vec<PublishedChapter>> {
        Ok(self
            .list(false)?
            .into_iter()
            .filter(|p| &p.chapter_id == chapter_id)
            .collect())
    }

    /// Reads a single snapshot by ID
    pub fn read(&self, id: &PublishedId) -> Result<Option<PublishedChapter>> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(self.read_from_file(&path)?))
    }

    /// Removes a snapshot by ID
    pub fn remove(&self, id: &PublishedId) -> Result<bool> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove snapshot file: {}", path.display()))?;

        Ok(true)
    }

    /// Removes every snapshot of a chapter, returning how many went
    pub fn remove_for_chapter(&self, chapter_id: &ChapterId) -> Result<usize> {
        let mut removed = 0;
        for published in self.for_chapter(chapter_id)? {
            if self.remove(&published.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Checks if a snapshot exists
    pub fn exists(&self, id: &PublishedId) -> bool {
        self.snapshot_path(id).exists()
    }
}

fn render_snapshot(published: &PublishedChapter) -> Result<String> {
    let frontmatter = PublishedFrontmatter::from(published);
    let yaml = serde_yaml::to_string(&frontmatter).context("Failed to serialize frontmatter")?;

    let mut content = String::new();
    content.push_str("---\n");
    content.push_str(&yaml);
    content.push_str("---\n\n");
    content.push_str(&published.content);
    content.push('\n');

    Ok(content)
}

fn parse_snapshot(content: &str) -> Result<PublishedChapter> {
    let rest = content
        .strip_prefix("---\n")
        .ok_or_else(|| anyhow::anyhow!("Missing frontmatter (must start with ---)"))?;

    // The closing delimiter sits on its own line
    let end_pos = rest
        .find("\n---\n")
        .ok_or_else(|| anyhow::anyhow!("Missing frontmatter end delimiter (---)"))?;

    let yaml_content = &rest[..end_pos];
    let body = rest[end_pos + 5..].trim();

    let fm: PublishedFrontmatter =
        serde_yaml::from_str(yaml_content).context("Failed to parse frontmatter")?;

    Ok(fm.into_published(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Author, Chapter, Document, Reaction, Visibility};
    use tempfile::TempDir;

    fn chapter_with(text: &str) -> Chapter {
        let mut chapter = Chapter::new(&Author::new("Ada", "ada@example.com"));
        let doc = Document::from_markdown(text);
        chapter.set_content(text.trim(), doc.canonical(), doc.plain_text());
        chapter
    }

    #[test]
    fn read_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn write_and_read_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let published = PublishedChapter::snapshot(&chapter_with("Dawn --- dusk"), Visibility::Public)
            .with_banner(Some("https://img.example.com/x.png".into()), Some("Unsplash".into()));
        store.write(&published).unwrap();

        let loaded = store.read(&published.id).unwrap().unwrap();
        assert_eq!(loaded, published);
        assert_eq!(loaded.document().unwrap().plain_text(), "Dawn --- dusk");
    }

    #[test]
    fn list_filters_public() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let chapter = chapter_with("Hello");
        let public = PublishedChapter::snapshot(&chapter, Visibility::Public);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let unlisted = PublishedChapter::snapshot(&chapter, Visibility::Unlisted);
        store.write(&public).unwrap();
        store.write(&unlisted).unwrap();

        assert_eq!(store.list(false).unwrap().len(), 2);
        let only_public = store.list(true).unwrap();
        assert_eq!(only_public.len(), 1);
        assert_eq!(only_public[0].id, public.id);
    }

    #[test]
    fn remove_for_chapter_cascades() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let first = chapter_with("First");
        let second = chapter_with("Second");
        let a = PublishedChapter::snapshot(&first, Visibility::Public);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = PublishedChapter::snapshot(&first, Visibility::Unlisted);
        let c = PublishedChapter::snapshot(&second, Visibility::Public);
        for p in [&a, &b, &c] {
            store.write(p).unwrap();
        }

        assert_eq!(store.remove_for_chapter(&first.id).unwrap(), 2);
        assert!(!store.exists(&a.id));
        assert!(!store.exists(&b.id));
        assert!(store.exists(&c.id));
    }

    #[test]
    fn broken_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let good = PublishedChapter::snapshot(&chapter_with("Good"), Visibility::Public);
        store.write(&good).unwrap();
        fs::write(store.dir().join("p-0000000.md"), "no frontmatter here").unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&good.id));
    }

    #[test]
    fn concurrent_reactions_are_all_counted() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let published = PublishedChapter::snapshot(&chapter_with("Popular"), Visibility::Public);
        store.write(&published).unwrap();

        let readers: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let id = published.id.clone();
                std::thread::spawn(move || {
                    let email = format!("reader{}@example.com", i);
                    store
                        .modify(&id, |p| Ok(p.react(&email, Reaction::Like)))
                        .unwrap()
                        .unwrap();
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }

        let loaded = store.read(&published.id).unwrap().unwrap();
        assert_eq!(loaded.likes_count, 16);
        assert_eq!(loaded.liked_by.len(), 16);
    }

    #[test]
    fn modify_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));
        let id: PublishedId = "p-0000000".parse().unwrap();

        assert!(store.modify(&id, |_| Ok(())).unwrap().is_none());
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn atomic_write_no_temp_file_left() {
        let dir = TempDir::new().unwrap();
        let store = PublishedStore::new(dir.path().join("published"));

        let published = PublishedChapter::snapshot(&chapter_with("Atomic"), Visibility::Public);
        store.write(&published).unwrap();

        let path = store.snapshot_path(&published.id);
        assert!(path.exists());
        assert!(!path.with_extension("md.tmp").exists());
    }
}
