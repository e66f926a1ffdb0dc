//! Chapter CLI commands

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use super::output::Output;
use crate::autosave::{
    displaced_draft, AutosaveController, CacheKeys, NoticeLevel, PersistenceGateway,
};
use crate::domain::{derive_heading, display_title, Author, ChapterId, Document};
use crate::storage::{ChapterGateway, Project};

/// Opens the current project together with the author and their gateway
pub(crate) fn open_session() -> Result<(Project, Author, ChapterGateway)> {
    let project = Project::open_current()?;
    let author = project.author()?;
    let gateway = project.gateway(author.clone());
    Ok((project, author, gateway))
}

/// Refuses to start a session on `id` while the draft cache holds unsaved
/// work of another chapter, unless the caller discards it
pub(crate) fn check_cached_draft(
    output: &Output,
    project: &Project,
    gateway: &ChapterGateway,
    id: &ChapterId,
    discard: bool,
) -> Result<()> {
    let cache = project.cache()?;
    let config = &project.config().project.autosave;

    let Some(other) = displaced_draft(config, &cache, gateway, id)? else {
        return Ok(());
    };

    if !discard {
        anyhow::bail!(
            "Chapter {} has unsaved changes in the local draft cache. \
             Run 'scribe edit {}' to save them, or pass --discard-draft to drop them",
            other,
            other
        );
    }

    output.warn(&format!("Discarding the unsaved draft of {}", other));
    Ok(())
}

pub fn new_chapter(output: &Output) -> Result<()> {
    let (_project, author, gateway) = open_session()?;

    let created = gateway.create_chapter(&author)?;
    output.verbose_ctx("new", &format!("Created for {}", author.email));

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": created.chapter_id.to_string(),
            "heading": created.initial_heading,
        }));
    } else {
        output.success(&format!(
            "Created chapter: {} ({})",
            created.chapter_id, created.initial_heading
        ));
    }

    Ok(())
}

pub fn list_chapters(output: &Output) -> Result<()> {
    let (project, author, _gateway) = open_session()?;

    let cache = project.get_or_rebuild_cache()?;
    let chapters = cache.list_chapters(&author.email)?;
    output.verbose_ctx("list", &format!("{} chapter(s) for {}", chapters.len(), author.email));

    if output.is_json() {
        let items: Vec<_> = chapters
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "heading": c.heading,
                    "title": display_title(&c.heading),
                    "updated_at": c.updated_at,
                })
            })
            .collect();
        output.data(&items);
    } else if chapters.is_empty() {
        println!("No chapters yet. Run 'scribe new' to start one.");
    } else {
        println!("{:<12} {:<22} TITLE", "ID", "UPDATED");
        println!("{}", "-".repeat(70));
        for chapter in &chapters {
            let updated = chrono::DateTime::parse_from_rfc3339(&chapter.updated_at)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|_| chapter.updated_at.clone());
            println!("{:<12} {:<22} {}", chapter.id, updated, display_title(&chapter.heading));
        }
    }

    Ok(())
}

pub fn show_chapter(output: &Output, id_str: &str, plain: bool) -> Result<()> {
    let (_project, _author, gateway) = open_session()?;

    let id: ChapterId = id_str.parse()?;
    let chapter = gateway.load_chapter(&id)?;
    let document = chapter
        .document()
        .with_context(|| format!("Chapter {} has unreadable content", id))?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": chapter.id.to_string(),
            "heading": chapter.heading,
            "author": chapter.author,
            "email": chapter.email,
            "created_at": chapter.created_at.to_rfc3339(),
            "updated_at": chapter.updated_at.to_rfc3339(),
            "content": chapter.content,
            "plain_text": document.plain_text(),
        }));
        return Ok(());
    }

    if !plain {
        println!("{}", chapter.heading);
        println!("{}", "=".repeat(chapter.heading.chars().count().max(3)));
        println!("ID:      {}", chapter.id);
        println!("Author:  {} <{}>", chapter.author, chapter.email);
        println!("Updated: {}", chapter.updated_at.format("%Y-%m-%d %H:%M"));
        println!();
        print!("{}", document.to_markdown());
    } else {
        println!("{}", document.plain_text());
    }

    Ok(())
}

/// One-shot save: the file's markdown becomes the chapter's content
pub fn write_chapter(output: &Output, id_str: &str, file: &Path, discard_draft: bool) -> Result<()> {
    let (project, _author, gateway) = open_session()?;

    let id: ChapterId = id_str.parse()?;
    let text = read_input(file)?;
    let chapter = gateway.load_chapter(&id)?;
    check_cached_draft(output, &project, &gateway, &id, discard_draft)?;

    let config = project.config().project.autosave.clone();
    let heading_length = config.heading_length;
    let now = Instant::now();

    let mut controller = AutosaveController::resume(config, project.cache()?, id, &chapter.content, now);
    let document = Document::from_markdown(&text);
    let heading = derive_heading(&document.plain_text(), heading_length);
    controller.on_change(document, now);

    let result = controller.save_now(&gateway, now);
    for notice in controller.take_notices() {
        match notice.level {
            NoticeLevel::Info => output.verbose_ctx("write", &notice.message),
            _ => output.notice(&notice),
        }
    }
    result.with_context(|| format!("Failed to save chapter {}", id_str))?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": controller.chapter_id().to_string(),
            "heading": heading,
            "status": controller.status(),
        }));
    } else {
        output.success(&format!("Saved chapter {} ({})", controller.chapter_id(), heading));
    }

    Ok(())
}

/// Reads markdown from a file, or stdin for `-`
fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }

    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Deletes a chapter with its published snapshots and cached draft
pub fn delete_chapter(output: &Output, id_str: &str) -> Result<()> {
    let (project, author, _gateway) = open_session()?;

    let id: ChapterId = id_str.parse()?;
    let store = project.chapter_store();
    let chapter = store
        .get(&id)?
        .ok_or_else(|| anyhow::anyhow!("Chapter not found: {}", id))?;

    if !chapter.is_owned_by(&author) {
        anyhow::bail!("Chapter {} belongs to another author", id);
    }

    store.remove(&id)?;
    let snapshots = project.published_store().remove_for_chapter(&id)?;
    output.verbose_ctx("delete", &format!("Removed {} snapshot(s)", snapshots));

    let mut cache = project.cache()?;
    let keys = CacheKeys::new(&project.config().project.autosave.cache_key_prefix);
    let draft_cleared = match keys.read_draft(&cache)? {
        Some(draft) if draft.chapter_id == id.to_string() => {
            keys.clear_all(&mut cache)?;
            true
        }
        _ => false,
    };

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": id.to_string(),
            "deleted": true,
            "published_removed": snapshots,
            "draft_cleared": draft_cleared,
        }));
    } else {
        output.success(&format!(
            "Deleted chapter {} ({}, {} published snapshot(s))",
            id,
            display_title(&chapter.heading),
            snapshots
        ));
    }

    Ok(())
}
