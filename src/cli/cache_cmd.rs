//! Cache CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::output::Output;
use crate::autosave::CacheKeys;
use crate::storage::{Cache, CacheError, Project};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Rebuild the cache from source files
    Rebuild,

    /// Show cache status
    Status,

    /// Discard the locally cached draft
    ClearDraft,
}

pub fn run(cmd: CacheCommands, output: &Output) -> Result<()> {
    match cmd {
        CacheCommands::Rebuild => rebuild(output),
        CacheCommands::Status => status(output),
        CacheCommands::ClearDraft => clear_draft(output),
    }
}

fn rebuild(output: &Output) -> Result<()> {
    let project = Project::open_current()?;
    output.verbose("Rebuilding cache from source files");

    let start = std::time::Instant::now();
    let cache = project.rebuild_cache()?;
    let duration = start.elapsed();

    let (chapters, published, _drafts) = cache.counts()?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "rebuilt": true,
            "duration_ms": duration.as_millis(),
            "chapters": chapters,
            "published": published,
        }));
    } else {
        output.success(&format!(
            "Cache rebuilt in {:?} ({} chapters, {} published)",
            duration, chapters, published
        ));
    }

    Ok(())
}

fn status(output: &Output) -> Result<()> {
    let project = Project::open_current()?;
    let cache = project.cache()?;

    let is_stale = cache.is_stale()?;
    let cache_path = cache.path().to_path_buf();
    let last_rebuild = cache
        .last_rebuild()?
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

    let (chapters, published, drafts) = cache.counts()?;
    let keys = CacheKeys::new(&project.config().project.autosave.cache_key_prefix);
    let active_draft = keys.read_draft(&cache)?.map(|d| d.chapter_id);

    if output.is_json() {
        output.data(&serde_json::json!({
            "path": cache_path.display().to_string(),
            "stale": is_stale,
            "last_rebuild": last_rebuild,
            "chapters": chapters,
            "published": published,
            "draft_keys": drafts,
            "active_draft": active_draft,
        }));
    } else {
        println!("Cache Status");
        println!("{}", "=".repeat(40));
        println!("Path: {}", cache_path.display());
        println!(
            "Status: {}",
            if is_stale {
                "STALE (needs rebuild)"
            } else {
                "fresh"
            }
        );
        if let Some(at) = &last_rebuild {
            println!("Last rebuild: {}", at);
        }
        println!();
        println!("Cached Data:");
        println!("  Chapters: {}", chapters);
        println!("  Published: {}", published);
        match &active_draft {
            Some(id) => println!("  Draft: {}", id),
            None => println!("  Draft: none"),
        }

        if is_stale {
            println!();
            println!("Run 'scribe cache rebuild' to update the cache.");
        }
    }

    Ok(())
}

fn clear_draft(output: &Output) -> Result<()> {
    let project = Project::open_current()?;

    let mut cache = match Cache::open_existing(project.root()) {
        Ok(cache) => cache,
        Err(e) if matches!(e.downcast_ref::<CacheError>(), Some(CacheError::NotFound(_))) => {
            output.success("No cached draft");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let keys = CacheKeys::new(&project.config().project.autosave.cache_key_prefix);
    let cleared = keys.read_draft(&cache)?.map(|d| d.chapter_id);
    keys.clear_all(&mut cache)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "cleared": cleared,
        }));
    } else {
        match cleared {
            Some(id) => output.success(&format!("Discarded cached draft of {}", id)),
            None => output.success("No cached draft"),
        }
    }

    Ok(())
}
