//! Domain models for Scribe
//!
//! Contains the chapter and document model without any I/O concerns.

mod id;
mod document;
mod heading;
mod chapter;
mod published;

pub use id::{ChapterId, IdError, PublishedId};
pub use document::{Block, Document, DocumentError};
pub use heading::{derive_heading, display_title, random_heading, DEFAULT_HEADING_LENGTH, UNTITLED};
pub use chapter::{Author, Chapter};
pub use published::{
    Comment, CommentError, PublishedChapter, PublishedFrontmatter, Reaction, ReactionOutcome,
    Visibility,
};
