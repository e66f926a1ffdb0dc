//! Publishing CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::chapter::open_session;
use super::output::Output;
use crate::autosave::{CacheKeys, PersistenceGateway};
use crate::domain::{
    display_title, ChapterId, PublishedChapter, PublishedId, Reaction, ReactionOutcome, Visibility,
};
use crate::storage::Project;

#[derive(Subcommand)]
pub enum PublishedCommands {
    /// List published snapshots, newest first
    List {
        /// Only snapshots listed in the public feed
        #[arg(long)]
        public: bool,
    },

    /// Show a published snapshot
    Show {
        /// Published snapshot ID
        id: String,
    },

    /// Remove one of your published snapshots
    Remove {
        /// Published snapshot ID
        id: String,
    },
}

pub fn run(cmd: PublishedCommands, output: &Output) -> Result<()> {
    match cmd {
        PublishedCommands::List { public } => list_published(output, public),
        PublishedCommands::Show { id } => show_published(output, &id),
        PublishedCommands::Remove { id } => remove_published(output, &id),
    }
}

/// Snapshots the chapter's persisted content
pub fn publish(
    output: &Output,
    id_str: &str,
    visibility: Option<&str>,
    banner: Option<String>,
    source: Option<String>,
) -> Result<()> {
    let (project, _author, gateway) = open_session()?;
    let publish_config = &project.config().project.publish;

    let id: ChapterId = id_str.parse()?;
    let chapter = gateway.load_chapter(&id)?;

    let visibility = match visibility {
        Some(v) => v.parse::<Visibility>().map_err(anyhow::Error::msg)?,
        None => publish_config.default_visibility,
    };
    let source = match (&banner, source) {
        (Some(_), None) => publish_config.default_image_source.clone(),
        (_, source) => source,
    };

    if has_unsaved_draft(&project, &id, &chapter.content)? {
        output.warn(&format!(
            "Chapter {} has unsaved local changes; publishing the last saved version",
            id
        ));
    }

    let published = PublishedChapter::snapshot(&chapter, visibility).with_banner(banner, source);
    project.published_store().write(&published)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": published.id.to_string(),
            "chapter_id": published.chapter_id.to_string(),
            "visibility": published.visibility,
            "heading": published.heading,
        }));
    } else {
        output.success(&format!(
            "Published {} as {} ({})",
            published.chapter_id, published.id, published.visibility
        ));
    }

    Ok(())
}

/// True when the draft cache holds content for this chapter that differs
/// from what was saved
fn has_unsaved_draft(project: &Project, id: &ChapterId, persisted: &str) -> Result<bool> {
    let cache = project.cache()?;
    let keys = CacheKeys::new(&project.config().project.autosave.cache_key_prefix);

    Ok(match keys.read_draft(&cache)? {
        Some(draft) if draft.chapter_id == id.to_string() => {
            draft.content.is_some_and(|content| content != persisted)
        }
        _ => false,
    })
}

fn list_published(output: &Output, public_only: bool) -> Result<()> {
    let project = Project::open_current()?;
    let snapshots = project.published_store().list(public_only)?;

    if output.is_json() {
        let items: Vec<_> = snapshots
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id.to_string(),
                    "chapter_id": p.chapter_id.to_string(),
                    "heading": p.heading,
                    "author": p.author,
                    "visibility": p.visibility,
                    "published_at": p.published_at.to_rfc3339(),
                })
            })
            .collect();
        output.data(&items);
    } else if snapshots.is_empty() {
        println!("Nothing published yet.");
    } else {
        println!("{:<12} {:<10} {:<18} TITLE", "ID", "VISIBILITY", "PUBLISHED");
        println!("{}", "-".repeat(70));
        for p in &snapshots {
            println!(
                "{:<12} {:<10} {:<18} {}",
                p.id,
                p.visibility,
                p.published_at.format("%Y-%m-%d %H:%M"),
                display_title(&p.heading)
            );
        }
    }

    Ok(())
}

fn show_published(output: &Output, id_str: &str) -> Result<()> {
    let project = Project::open_current()?;

    let id: PublishedId = id_str.parse()?;
    let published = project
        .published_store()
        .read(&id)?
        .ok_or_else(|| anyhow::anyhow!("Published snapshot not found: {}", id))?;

    if output.is_json() {
        output.data(&published);
        return Ok(());
    }

    println!("{}", published.heading);
    println!("{}", "=".repeat(published.heading.chars().count().max(3)));
    println!("ID:         {}", published.id);
    println!("Chapter:    {}", published.chapter_id);
    println!("Author:     {}", published.author);
    println!("Visibility: {}", published.visibility);
    println!("Published:  {}", published.published_at.format("%Y-%m-%d %H:%M"));
    if let Some(banner) = &published.banner_image {
        match &published.image_source {
            Some(source) => println!("Banner:     {} ({})", banner, source),
            None => println!("Banner:     {}", banner),
        }
    }
    println!(
        "Reactions:  {} likes, {} dislikes, {} comments",
        published.likes_count, published.dislikes_count, published.comments_count
    );
    output.blank();

    match published.document() {
        Ok(document) => print!("{}", document.to_markdown()),
        Err(e) => output.warn(&format!("Snapshot content is unreadable: {}", e)),
    }

    if !published.comments.is_empty() {
        output.blank();
        println!("Comments");
        println!("--------");
        for comment in &published.comments {
            let reply = comment
                .parent
                .map(|parent| format!(" (reply to #{})", parent))
                .unwrap_or_default();
            println!(
                "#{} {} <{}>, {}{}",
                comment.id,
                comment.author,
                comment.email,
                comment.created_at.format("%Y-%m-%d %H:%M"),
                reply
            );
            println!("    {}", comment.content.replace('\n', "\n    "));
        }
    }

    Ok(())
}

/// Toggles the author's like or dislike on a snapshot
pub fn react(output: &Output, id_str: &str, reaction: &str) -> Result<()> {
    let (project, author, _gateway) = open_session()?;

    let id: PublishedId = id_str.parse()?;
    let reaction: Reaction = reaction.parse().map_err(anyhow::Error::msg)?;

    let (outcome, likes, dislikes) = project
        .published_store()
        .modify(&id, |published| {
            let outcome = published.react(&author.email, reaction);
            Ok((outcome, published.likes_count, published.dislikes_count))
        })?
        .ok_or_else(|| anyhow::anyhow!("Published snapshot not found: {}", id))?;
    output.verbose_ctx("react", &format!("{} by {}: {:?}", reaction, author.email, outcome));

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": id.to_string(),
            "reaction": reaction,
            "outcome": outcome,
            "likes_count": likes,
            "dislikes_count": dislikes,
        }));
    } else {
        let verb = match (reaction, outcome) {
            (Reaction::Like, ReactionOutcome::Added) => "Liked",
            (Reaction::Like, ReactionOutcome::Withdrawn) => "Removed your like from",
            (Reaction::Dislike, ReactionOutcome::Added) => "Disliked",
            (Reaction::Dislike, ReactionOutcome::Withdrawn) => "Removed your dislike from",
        };
        output.success(&format!(
            "{} {} ({} likes, {} dislikes)",
            verb, id, likes, dislikes
        ));
    }

    Ok(())
}

/// Adds the author's comment to a snapshot
pub fn comment(output: &Output, id_str: &str, text: &str, reply_to: Option<u32>) -> Result<()> {
    let (project, author, _gateway) = open_session()?;

    let id: PublishedId = id_str.parse()?;
    let (comment, count) = project
        .published_store()
        .modify(&id, |published| {
            let comment = published.add_comment(&author, text, reply_to)?.clone();
            Ok((comment, published.comments_count))
        })?
        .ok_or_else(|| anyhow::anyhow!("Published snapshot not found: {}", id))?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": id.to_string(),
            "comment": comment,
            "comments_count": count,
        }));
    } else {
        output.success(&format!("Added comment #{} to {} ({} comments)", comment.id, id, count));
    }

    Ok(())
}

fn remove_published(output: &Output, id_str: &str) -> Result<()> {
    let (project, author, _gateway) = open_session()?;
    let store = project.published_store();

    let id: PublishedId = id_str.parse()?;
    let published = store
        .read(&id)?
        .ok_or_else(|| anyhow::anyhow!("Published snapshot not found: {}", id))?;

    if !published.email.eq_ignore_ascii_case(&author.email) {
        anyhow::bail!("Published snapshot {} belongs to another author", id);
    }

    store.remove(&id)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": id.to_string(),
            "removed": true,
        }));
    } else {
        output.success(&format!("Removed published snapshot {}", id));
    }

    Ok(())
}
