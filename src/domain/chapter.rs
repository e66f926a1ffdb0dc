//! Chapter domain model
//!
//! A chapter is the user-facing authored unit. It owns exactly one current
//! document, stored as its canonical content string together with the
//! derived plain-text projection and heading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentError};
use super::heading::random_heading;
use super::id::ChapterId;

/// The authenticated author of an editing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A chapter and its current document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,

    /// Owner's email
    pub email: String,

    /// Owner's display name
    pub author: String,

    /// Denormalized copy of the document's derived heading
    pub heading: String,

    /// Canonical content string
    pub content: String,

    /// Plain-text projection of the content
    #[serde(default)]
    pub parsed: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    /// Creates an empty chapter for an author with a random heading
    pub fn new(author: &Author) -> Self {
        let now = Utc::now();
        let id = ChapterId::new(&author.email, now);
        let document = Document::initial();

        Self {
            heading: random_heading(&id.to_string()),
            id,
            email: author.email.clone(),
            author: author.name.clone(),
            content: document.canonical(),
            parsed: document.plain_text(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parses the stored content
    pub fn document(&self) -> Result<Document, DocumentError> {
        Document::from_canonical(&self.content)
    }

    /// Replaces the stored content
    pub fn set_content(
        &mut self,
        heading: impl Into<String>,
        content: impl Into<String>,
        parsed: impl Into<String>,
    ) {
        self.heading = heading.into();
        self.content = content.into();
        self.parsed = parsed.into();
        self.updated_at = Utc::now();
    }

    /// Returns true if the author owns this chapter
    pub fn is_owned_by(&self, author: &Author) -> bool {
        self.email.eq_ignore_ascii_case(&author.email)
    }
}
