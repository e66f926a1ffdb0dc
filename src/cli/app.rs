//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::output::{Output, OutputFormat};
use super::{cache_cmd, chapter, edit, publish};
use crate::storage::{Config, Project};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(author, version, about = "Local-first chapter authoring with autosave")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new scribe project
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Create a new chapter
    New,

    /// List your chapters, most recently updated first
    List,

    /// Show a chapter
    Show {
        /// Chapter ID
        id: String,

        /// Print the plain-text projection only
        #[arg(long)]
        plain: bool,
    },

    /// Save a markdown file as a chapter's content
    Write {
        /// Chapter ID
        id: String,

        /// Markdown file, or - for stdin
        file: PathBuf,

        /// Drop another chapter's unsaved draft from the local cache
        #[arg(long)]
        discard_draft: bool,
    },

    /// Edit a chapter with autosave
    Edit {
        /// Chapter ID
        id: String,

        /// Working file (defaults to .scribe/drafts/working.md)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Drop another chapter's unsaved draft from the local cache
        #[arg(long)]
        discard_draft: bool,
    },

    /// Delete a chapter and its published snapshots
    Delete {
        /// Chapter ID
        id: String,
    },

    /// Publish a snapshot of a chapter's saved content
    Publish {
        /// Chapter ID
        id: String,

        /// public or unlisted (defaults to the project config)
        #[arg(long)]
        visibility: Option<String>,

        /// Banner image URL
        #[arg(long)]
        banner: Option<String>,

        /// Banner image attribution
        #[arg(long)]
        source: Option<String>,
    },

    /// Manage published snapshots
    #[command(subcommand)]
    Published(publish::PublishedCommands),

    /// Like or dislike a published snapshot; repeating withdraws it
    React {
        /// Published snapshot ID
        id: String,

        /// like or dislike
        reaction: String,
    },

    /// Comment on a published snapshot
    Comment {
        /// Published snapshot ID
        id: String,

        /// Comment text
        text: String,

        /// Number of the comment this one replies to
        #[arg(long)]
        reply_to: Option<u32>,
    },

    /// Search chapters and published snapshots
    Search {
        /// Search query
        query: String,
    },

    /// Manage the SQLite cache
    #[command(subcommand)]
    Cache(cache_cmd::CacheCommands),
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = match cli.format {
        Some(format) => format,
        None => default_format(),
    };
    let output = Output::new(format, cli.verbose);

    output.verbose("Scribe CLI starting");

    match cli.command {
        Commands::Init { path } => {
            output.verbose_ctx("init", &format!("Initializing project at: {}", path));
            let project = Project::init(&path)?;
            output.verbose_ctx("init", &format!("Created .scribe directory at: {}", project.scribe_dir().display()));
            output.success(&format!("Initialized scribe project at {}", project.root().display()));
        }

        Commands::New => chapter::new_chapter(&output)?,
        Commands::List => chapter::list_chapters(&output)?,
        Commands::Show { id, plain } => chapter::show_chapter(&output, &id, plain)?,
        Commands::Write { id, file, discard_draft } => {
            chapter::write_chapter(&output, &id, &file, discard_draft)?
        }
        Commands::Edit { id, file, discard_draft } => edit::run(&output, &id, file, discard_draft)?,
        Commands::Delete { id } => chapter::delete_chapter(&output, &id)?,

        Commands::Publish { id, visibility, banner, source } => {
            publish::publish(&output, &id, visibility.as_deref(), banner, source)?
        }
        Commands::Published(cmd) => publish::run(cmd, &output)?,
        Commands::React { id, reaction } => publish::react(&output, &id, &reaction)?,
        Commands::Comment { id, text, reply_to } => {
            publish::comment(&output, &id, &text, reply_to)?
        }

        Commands::Search { query } => search(&output, &query)?,

        Commands::Cache(cmd) => cache_cmd::run(cmd, &output)?,
    }

    output.verbose("Command completed successfully");
    Ok(())
}

/// Library events go to stderr; `SCRIBE_LOG` overrides the level
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SCRIBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("scribe_cli={}", level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn default_format() -> OutputFormat {
    match Config::load() {
        Ok(config) => config.global.default_format.into(),
        Err(e) => {
            tracing::warn!("ignoring unreadable configuration: {:#}", e);
            OutputFormat::default()
        }
    }
}

/// Search chapters and snapshots using the SQLite cache
fn search(output: &Output, query: &str) -> Result<()> {
    use crate::storage::SearchResultType;

    let project = Project::open_current()?;
    let author = project.author()?;
    output.verbose_ctx("search", &format!("Searching for: {}", query));

    // Ensure cache is up to date
    let cache = project.get_or_rebuild_cache()?;

    let results = cache.search(query, &author.email)?;
    output.verbose_ctx("search", &format!("Found {} results", results.len()));

    if output.is_json() {
        output.data(&results);
    } else if results.is_empty() {
        println!("No results found for '{}'", query);
    } else {
        println!("Search results for '{}':", query);
        println!("{:<12} {:<12} TITLE", "TYPE", "ID");
        println!("{}", "-".repeat(70));

        for result in &results {
            let type_str = match result.result_type {
                SearchResultType::Chapter => "chapter",
                SearchResultType::Published => "published",
            };
            println!("{:<12} {:<12} {}", type_str, result.id, result.title);

            if !result.snippet.is_empty() && result.snippet != result.title {
                // Highlight matches for the terminal
                let clean_snippet = result
                    .snippet
                    .replace("<mark>", "\x1b[1m")
                    .replace("</mark>", "\x1b[0m");
                println!("             {}", clean_snippet);
            }
        }

        println!();
        println!("Found {} result(s)", results.len());
    }

    Ok(())
}
