//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Core | Project setup | `init` |
//! | Chapters | Authoring | `new`, `list`, `show`, `write`, `edit`, `delete` |
//! | Publishing | Snapshots | `publish`, `published list`, `published show` |
//! | Readers | Feedback on snapshots | `react`, `comment` |
//! | Search | Full-text queries | `search` |
//! | Cache | Maintenance | `cache rebuild`, `cache status`, `cache clear-draft` |
//!
//! ## Editing Sessions
//!
//! `scribe edit <id>` keeps running until `quit` (or end of input). Edit the
//! working file in any editor; saves happen after a quiet period, and
//! `save` on stdin saves at once.
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output:
//! ```bash
//! scribe --verbose list
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod output;
mod chapter;
mod edit;
mod publish;
mod cache_cmd;

pub use app::{Cli, Commands, run};
pub use output::{Output, OutputFormat};
