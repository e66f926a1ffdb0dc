//! Persistence gateway port
//!
//! The controller never talks to storage directly: the session driver hands
//! each [`ChapterUpdate`] to a [`PersistenceGateway`] and reports the result
//! back. Calls are idempotent, so retrying a given update is safe.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{Author, Chapter, ChapterId};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("Chapter not found: {0}")]
    NotFound(ChapterId),

    #[error("Chapter {0} belongs to another author")]
    Forbidden(ChapterId),

    #[error("Chapter storage unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Not-found and forbidden end the session's ability to save; retrying
    /// cannot succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::NotFound(_) | GatewayError::Forbidden(_))
    }
}

/// Arguments of one save
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterUpdate {
    pub chapter_id: ChapterId,
    pub heading: String,
    pub content: String,
    pub plain_text: String,
}

/// Result of creating a chapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedChapter {
    pub chapter_id: ChapterId,
    pub initial_heading: String,
}

/// Remote create/load/update operations backing chapter storage
pub trait PersistenceGateway {
    /// Creates an empty chapter owned by the author
    fn create_chapter(&self, author: &Author) -> Result<CreatedChapter, GatewayError>;

    /// Loads a chapter the session may edit
    fn load_chapter(&self, id: &ChapterId) -> Result<Chapter, GatewayError>;

    /// Replaces a chapter's heading and content
    fn update_chapter(&self, update: &ChapterUpdate) -> Result<(), GatewayError>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for &G {
    fn create_chapter(&self, author: &Author) -> Result<CreatedChapter, GatewayError> {
        (**self).create_chapter(author)
    }

    fn load_chapter(&self, id: &ChapterId) -> Result<Chapter, GatewayError> {
        (**self).load_chapter(id)
    }

    fn update_chapter(&self, update: &ChapterUpdate) -> Result<(), GatewayError> {
        (**self).update_chapter(update)
    }
}
