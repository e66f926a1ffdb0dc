//! # Autosave
//!
//! Keeps one chapter's persisted content in step with local edits.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`AutosaveController`] | Per-session state machine: dirty-check, debounce, single in-flight save |
//! | [`PersistenceGateway`] | Port for create/load/update calls |
//! | [`DraftCache`] | Port for the local durable draft (`content`, `plainText`, `activeChapterId`) |
//! | [`SaveStatus`] | `idle`, `dirty`, `saving`, `saved` |
//!
//! ## Status flow
//!
//! ```text
//! Idle ──edit──▶ Dirty ──debounce / manual save──▶ Saving ──ok──▶ Saved ──display interval──▶ Idle
//!                  ▲                                  │
//!                  └──────────────failure─────────────┘
//! ```

mod status;
mod gateway;
mod draft;
mod controller;

pub use status::{SaveStatus, Transition};
pub use gateway::{ChapterUpdate, CreatedChapter, GatewayError, PersistenceGateway};
pub use draft::{CacheKeys, CachedDraft, DraftCache, DraftCacheError, MemoryDraftCache};
pub use controller::{
    displaced_draft, AutosaveConfig, AutosaveController, ControllerError, Notice, NoticeLevel,
    SaveRequest,
};
