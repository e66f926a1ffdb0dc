//! Scribe CLI - Local-first chapter authoring with debounced autosave
//!
//! Chapters are block documents edited through a markdown working file. An
//! [`AutosaveController`] per editing session decides when content is dirty,
//! debounces saves, keeps at most one save in flight, and mirrors unsaved
//! work into a local draft cache so nothing is lost between sessions.

pub mod domain;
pub mod autosave;
pub mod storage;
pub mod cli;

pub use autosave::{AutosaveConfig, AutosaveController, SaveStatus};
pub use domain::{Chapter, ChapterId, Document, PublishedChapter, PublishedId};
