//! Output formatting for CLI commands

use serde::Serialize;

use crate::autosave::{Notice, NoticeLevel, Transition};
use crate::storage;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl From<storage::OutputFormat> for OutputFormat {
    fn from(format: storage::OutputFormat) -> Self {
        match format {
            storage::OutputFormat::Text => Self::Text,
            storage::OutputFormat::Json => Self::Json,
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    format: OutputFormat,
    verbose: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Prints a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "message": message
                    })
                );
            }
        }
    }

    /// Prints a warning to stderr
    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Text => eprintln!("Warning: {}", message),
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "warning": message
                    })
                );
            }
        }
    }

    /// Prints structured data
    pub fn data<T: Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Text => {
                // Callers render text themselves; this is the fallback
                if let Ok(json) = serde_json::to_string_pretty(data) {
                    println!("{}", json);
                }
            }
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(data) {
                    println!("{}", json);
                }
            }
        }
    }

    /// Prints a save status change of an editing session
    pub fn transition(&self, transition: &Transition) {
        match self.format {
            OutputFormat::Text => {
                println!("[{}] {}", transition.to.displayed(), transition.to.indicator());
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "status",
                        "from": transition.from,
                        "to": transition.to,
                        "displayed": transition.to.displayed(),
                    })
                );
            }
        }
    }

    /// Prints a notice raised by an editing session
    pub fn notice(&self, notice: &Notice) {
        match self.format {
            OutputFormat::Text => {
                let prefix = match notice.level {
                    NoticeLevel::Info => "Note",
                    NoticeLevel::Warning => "Warning",
                    NoticeLevel::Error => "Error",
                    NoticeLevel::Fatal => "Fatal",
                };
                eprintln!("{}: {}", prefix, notice.message);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "notice",
                        "level": notice.level,
                        "message": notice.message,
                    })
                );
            }
        }
    }

    /// Prints a blank line (text only)
    pub fn blank(&self) {
        if self.format == OutputFormat::Text {
            println!();
        }
    }

    /// Returns true if using JSON format
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Prints a verbose debug message (only when --verbose is set)
    pub fn verbose(&self, message: &str) {
        if self.verbose {
            eprintln!("[verbose] {}", message);
        }
    }

    /// Prints a verbose debug message with context (only when --verbose is set)
    pub fn verbose_ctx(&self, context: &str, message: &str) {
        if self.verbose {
            eprintln!("[verbose:{}] {}", context, message);
        }
    }
}
