//! Published chapter snapshots
//!
//! Publishing copies a chapter's *persisted* content into an immutable
//! snapshot. Later edits to the chapter never touch existing snapshots;
//! deleting the chapter removes them.
//!
//! Readers react to a snapshot and comment on it. A reader holds at most
//! one reaction: liking clears their dislike and the other way round, and
//! repeating a reaction withdraws it. The counters are recomputed from the
//! reader lists on every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chapter::{Author, Chapter};
use super::document::{Document, DocumentError};
use super::id::{ChapterId, PublishedId};

/// Who can find a published snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed in the public feed
    #[default]
    Public,

    /// Reachable by ID only
    Unlisted,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Unlisted => write!(f, "unlisted"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "unlisted" | "private" => Ok(Visibility::Unlisted),
            _ => Err(format!("Unknown visibility: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Like,
    Dislike,
}

impl std::fmt::Display for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reaction::Like => write!(f, "like"),
            Reaction::Dislike => write!(f, "dislike"),
        }
    }
}

impl std::str::FromStr for Reaction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "like" => Ok(Reaction::Like),
            "dislike" => Ok(Reaction::Dislike),
            _ => Err(format!("Unknown reaction: {} (expected like or dislike)", s)),
        }
    }
}

/// What a reaction toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionOutcome {
    Added,
    Withdrawn,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommentError {
    #[error("Comment is empty")]
    Empty,

    #[error("Comment {0} not found")]
    ParentNotFound(u32),
}

/// A reader's comment on a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Sequence number within the snapshot
    pub id: u32,

    /// Comment this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,

    pub author: String,
    pub email: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A published snapshot of a chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedChapter {
    pub id: PublishedId,
    pub chapter_id: ChapterId,
    pub visibility: Visibility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<String>,

    pub author: String,
    pub email: String,
    pub heading: String,

    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub dislikes_count: u64,
    #[serde(default)]
    pub comments_count: u64,

    /// Emails of readers who liked the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub liked_by: Vec<String>,

    /// Emails of readers who disliked the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disliked_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,

    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Canonical content string at publish time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl PublishedChapter {
    /// Snapshots the chapter's persisted content
    pub fn snapshot(chapter: &Chapter, visibility: Visibility) -> Self {
        let now = Utc::now();
        Self {
            id: PublishedId::new(&chapter.id, now),
            chapter_id: chapter.id.clone(),
            visibility,
            banner_image: None,
            image_source: None,
            author: chapter.author.clone(),
            email: chapter.email.clone(),
            heading: chapter.heading.clone(),
            likes_count: 0,
            dislikes_count: 0,
            comments_count: 0,
            liked_by: Vec::new(),
            disliked_by: Vec::new(),
            comments: Vec::new(),
            published_at: now,
            updated_at: now,
            content: chapter.content.clone(),
        }
    }

    /// Sets the banner image and its attribution
    pub fn with_banner(mut self, image: Option<String>, source: Option<String>) -> Self {
        self.banner_image = image;
        self.image_source = source;
        self
    }

    /// Parses the snapshot content
    pub fn document(&self) -> Result<Document, DocumentError> {
        Document::from_canonical(&self.content)
    }

    /// Returns true if listed in the public feed
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// The reader's current reaction
    pub fn reaction_of(&self, email: &str) -> Option<Reaction> {
        if contains_email(&self.liked_by, email) {
            Some(Reaction::Like)
        } else if contains_email(&self.disliked_by, email) {
            Some(Reaction::Dislike)
        } else {
            None
        }
    }

    /// Toggles a reader's reaction
    pub fn react(&mut self, email: &str, reaction: Reaction) -> ReactionOutcome {
        let (own, opposite) = match reaction {
            Reaction::Like => (&mut self.liked_by, &mut self.disliked_by),
            Reaction::Dislike => (&mut self.disliked_by, &mut self.liked_by),
        };

        let outcome = if contains_email(own, email) {
            own.retain(|e| !e.eq_ignore_ascii_case(email));
            ReactionOutcome::Withdrawn
        } else {
            own.push(email.to_lowercase());
            opposite.retain(|e| !e.eq_ignore_ascii_case(email));
            ReactionOutcome::Added
        };

        self.recount();
        outcome
    }

    /// Adds a comment, optionally as a reply to an existing one
    pub fn add_comment(
        &mut self,
        author: &Author,
        content: &str,
        parent: Option<u32>,
    ) -> Result<&Comment, CommentError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommentError::Empty);
        }
        if let Some(parent) = parent {
            if !self.comments.iter().any(|c| c.id == parent) {
                return Err(CommentError::ParentNotFound(parent));
            }
        }

        let id = self.comments.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        self.comments.push(Comment {
            id,
            parent,
            author: author.name.clone(),
            email: author.email.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        });
        self.recount();

        Ok(&self.comments[self.comments.len() - 1])
    }

    fn recount(&mut self) {
        self.likes_count = self.liked_by.len() as u64;
        self.dislikes_count = self.disliked_by.len() as u64;
        self.comments_count = self.comments.len() as u64;
        self.updated_at = Utc::now();
    }
}

fn contains_email(list: &[String], email: &str) -> bool {
    list.iter().any(|e| e.eq_ignore_ascii_case(email))
}

/// Frontmatter section of a published snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedFrontmatter {
    pub id: PublishedId,
    pub chapter_id: ChapterId,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<String>,
    pub author: String,
    pub email: String,
    pub heading: String,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub dislikes_count: u64,
    #[serde(default)]
    pub comments_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub liked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disliked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PublishedChapter> for PublishedFrontmatter {
    fn from(p: &PublishedChapter) -> Self {
        Self {
            id: p.id.clone(),
            chapter_id: p.chapter_id.clone(),
            visibility: p.visibility,
            banner_image: p.banner_image.clone(),
            image_source: p.image_source.clone(),
            author: p.author.clone(),
            email: p.email.clone(),
            heading: p.heading.clone(),
            likes_count: p.likes_count,
            dislikes_count: p.dislikes_count,
            comments_count: p.comments_count,
            liked_by: p.liked_by.clone(),
            disliked_by: p.disliked_by.clone(),
            comments: p.comments.clone(),
            published_at: p.published_at,
            updated_at: p.updated_at,
        }
    }
}

impl PublishedFrontmatter {
    /// Converts to a snapshot with the given content
    pub fn into_published(self, content: String) -> PublishedChapter {
        PublishedChapter {
            id: self.id,
            chapter_id: self.chapter_id,
            visibility: self.visibility,
            banner_image: self.banner_image,
            image_source: self.image_source,
            author: self.author,
            email: self.email,
            heading: self.heading,
            likes_count: self.likes_count,
            dislikes_count: self.dislikes_count,
            comments_count: self.comments_count,
            liked_by: self.liked_by,
            disliked_by: self.disliked_by,
            comments: self.comments,
            published_at: self.published_at,
            updated_at: self.updated_at,
            content,
        }
    }
}
